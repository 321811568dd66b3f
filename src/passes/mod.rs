//! Pipeline passes, run in order by [`crate::Transcriber`]

pub mod pass_0;
pub mod pass_1;
pub mod pass_2;
pub mod pass_3;
