pub mod entities;
pub mod generation;
pub mod ledger;
pub mod message;
pub mod messaging;
pub mod recipe;
pub mod repositories;

pub use entities::*;
pub use generation::*;
pub use ledger::{JobLedger, MAX_ATTEMPTS_EXCEEDED};
pub use message::*;
pub use messaging::*;
pub use recipe::*;
pub use repositories::*;
pub use mealprep_core::{MealPrepError, MealPrepResult};
