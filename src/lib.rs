//! Board archiver library.
//!
//! A service that periodically crawls a forum-style message board, stores new
//! threads, posts and images in SQLite, and keeps each thread's reply count in
//! line with the replies actually stored.

pub mod assets;
pub mod config;
pub mod constants;
pub mod crawler;
pub mod db;
pub mod scheduler;
