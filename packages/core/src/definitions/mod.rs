mod command_type;
mod home_id;
mod node_id;
mod node_id_type;

pub use command_type::*;
pub use home_id::*;
pub use node_id::*;
pub use node_id_type::*;
