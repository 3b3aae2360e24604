pub mod constants;
pub mod double_buffer;
pub mod entity;
pub mod game_loop;
pub mod input_buffer;
pub mod performance;
pub mod schema;
pub mod spatial;
pub mod spawn;
pub mod systems;
pub mod world;
