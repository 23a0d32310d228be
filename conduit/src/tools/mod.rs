mod r#trait;

pub use r#trait::Tool;
