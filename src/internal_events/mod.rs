mod mapping;
mod step;
mod transformation;

pub use self::{mapping::*, step::*, transformation::*};
