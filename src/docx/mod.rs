pub mod starter;
pub mod template;

pub use starter::write_starter_template;
pub use template::{document_text, DocxTemplate, TemplateValue};
