use mealprep_core::{MealPrepError, MealPrepResult};
use serde::{Deserialize, Serialize};

pub const MAX_STORAGE_TIME_DAYS: u32 = 180;
pub const MAX_PREP_TIME_MINUTES: u32 = 120;
pub const MAX_COOK_TIME_MINUTES: u32 = 180;
pub const MAX_SERVINGS: u32 = 12;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ingredient {
    pub name: String,
    #[serde(default)]
    pub amount: String,
    #[serde(default)]
    pub unit: String,
}

/// Recipe returned by the generation service, before it is stored
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedRecipe {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub season: String,
    #[serde(default)]
    pub ingredients: Vec<Ingredient>,
    #[serde(default)]
    pub prep_instructions: Vec<String>,
    #[serde(default)]
    pub cooking_instructions: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Minutes
    pub prep_time: u32,
    /// Minutes
    pub cook_time: u32,
    pub servings: u32,
    /// Days the prepared meal keeps frozen
    pub storage_time: u32,
}

impl GeneratedRecipe {
    /// Reject a recipe whose numeric fields are outside the stored bounds
    pub fn validate(&self) -> MealPrepResult<()> {
        if self.title.trim().is_empty() {
            return Err(MealPrepError::Validation("title不能为空".to_string()));
        }
        check_range("storageTime", self.storage_time, MAX_STORAGE_TIME_DAYS)?;
        check_range("prepTime", self.prep_time, MAX_PREP_TIME_MINUTES)?;
        check_range("cookTime", self.cook_time, MAX_COOK_TIME_MINUTES)?;
        check_range("servings", self.servings, MAX_SERVINGS)?;
        Ok(())
    }

    /// Copy with every numeric field clamped into `1..=max`
    pub fn clamped(&self) -> Self {
        let mut recipe = self.clone();
        recipe.storage_time = recipe.storage_time.clamp(1, MAX_STORAGE_TIME_DAYS);
        recipe.prep_time = recipe.prep_time.clamp(1, MAX_PREP_TIME_MINUTES);
        recipe.cook_time = recipe.cook_time.clamp(1, MAX_COOK_TIME_MINUTES);
        recipe.servings = recipe.servings.clamp(1, MAX_SERVINGS);
        recipe
    }
}

fn check_range(field: &str, value: u32, max: u32) -> MealPrepResult<()> {
    if value == 0 || value > max {
        return Err(MealPrepError::Validation(format!(
            "{field}={value} 超出范围 1..={max}"
        )));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn sample_recipe(title: &str) -> GeneratedRecipe {
    GeneratedRecipe {
        title: title.to_string(),
        description: "Hearty freezer-friendly stew".to_string(),
        season: "fall".to_string(),
        ingredients: vec![Ingredient {
            name: "butternut squash".to_string(),
            amount: "1".to_string(),
            unit: "whole".to_string(),
        }],
        prep_instructions: vec!["Dice the squash".to_string()],
        cooking_instructions: vec!["Simmer for 40 minutes".to_string()],
        tags: vec!["soup".to_string()],
        prep_time: 20,
        cook_time: 40,
        servings: 6,
        storage_time: 90,
    }
}
