pub mod bootstrap;
pub mod commands;
pub mod debounce;
pub mod integrity;
pub mod repository;
pub mod session_recorder;
pub mod sync;
pub mod task_service;
pub mod timer_engine;
pub mod timer_runner;
pub mod user_session;
pub mod workspace;
