pub mod path;
pub mod url;
