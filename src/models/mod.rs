pub mod bookmarklet;
pub mod plan;
pub mod project;
