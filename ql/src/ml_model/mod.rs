pub mod burn_model;
pub mod model;
