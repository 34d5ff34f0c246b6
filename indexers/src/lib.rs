pub mod assembly;
pub mod seeder;

pub use assembly::assemble_text;
pub use seeder::{MultiVectorSeeder, SeedReport, SeederConfig, SeederError};
