mod dim;
mod distributed;
mod distribution;
mod view;
mod window;

pub use dim::*;
pub use distributed::*;
pub use distribution::*;
pub use view::*;
pub use window::*;
