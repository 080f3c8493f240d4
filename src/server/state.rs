//! Shared application state, cloned cheaply into every request (mirrors the teacher's
//! `WrapperState` pattern: an `Arc`-backed bundle of the long-lived transport, cache, and
//! config).

use std::sync::Arc;

use crate::config::Config;
use crate::teachers::TeacherCache;
use crate::transport::Transport;

#[derive(Clone)]
pub struct AppState {
    pub transport: Arc<Transport>,
    pub teacher_cache: Arc<TeacherCache>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(transport: Transport, teacher_cache: TeacherCache, config: Config) -> Self {
        Self {
            transport: Arc::new(transport),
            teacher_cache: Arc::new(teacher_cache),
            config: Arc::new(config),
        }
    }
}
