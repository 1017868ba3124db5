pub mod sqlite_job_repository;
pub mod sqlite_recipe_sink;

pub use sqlite_job_repository::SqliteJobRepository;
pub use sqlite_recipe_sink::SqliteRecipeSink;
