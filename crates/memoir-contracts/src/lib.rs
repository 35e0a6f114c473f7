pub mod decade;
pub mod events;
pub mod images;
pub mod prompt;
