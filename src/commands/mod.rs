pub mod detect;
pub mod generate;
pub mod outline;
pub mod page_labels;
pub mod render;
