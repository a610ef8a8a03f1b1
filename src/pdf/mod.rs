pub mod annotations;
pub mod document;
pub mod fonts;
pub mod outline;
pub mod page_labels;
pub mod text;
pub mod toc;

pub use document::PdfDocument;
