pub mod api;
pub mod cli;
pub mod collector;
pub mod database_ops;
pub mod logging;

pub mod normalization {
    pub mod ranking;
}

pub mod util {
    pub mod env;
}
