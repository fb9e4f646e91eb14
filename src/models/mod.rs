pub mod caller;
pub mod circuit_breaker;
pub mod directory;
pub mod email;
pub mod event;
pub mod health;
pub mod response;
pub mod retry;
pub mod status;
pub mod subscription;
pub mod task;
pub mod template;
pub mod topic;
pub mod validation;
