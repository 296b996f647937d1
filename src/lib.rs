#![forbid(unsafe_code)]

pub mod catalog;
pub mod cli;
pub mod download;
pub mod fetch;
pub mod formats;
pub mod interrupt;
pub mod logging;
pub mod output;
pub mod pipeline;
pub mod report;
pub mod site;
pub mod status_store;
