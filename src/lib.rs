//! logscope: terminal and HTML client for log-search APIs, driven by a bookmarkable state token.

mod cli;
pub mod logscope_api;
pub mod logscope_app;
pub mod logscope_core;
pub mod logscope_dispatch;
pub mod logscope_driver;
pub mod logscope_graph;
pub mod logscope_render;
pub mod logscope_state;
pub mod logscope_tui;
pub mod logscope_web;
pub mod sanitize;

pub use cli::{render_text, run, DynError};
