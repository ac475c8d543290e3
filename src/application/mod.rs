//! Application services: the timeline engine and the ports it drives.

pub mod error;
pub mod fanout;
pub mod repos;
pub mod timeline;
