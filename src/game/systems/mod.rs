pub mod collision;
pub mod movement;
pub mod skills;
