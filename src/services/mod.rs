pub mod line_items;
pub mod normalize;
pub mod record_builder;
