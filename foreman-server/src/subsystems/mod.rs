pub mod assets;
pub mod compose;
pub mod extract;
pub mod memory;
pub mod orchestrate;
pub mod procedure;
