pub mod composition;
pub mod config;
pub mod criteria;
pub mod domain;
pub mod elements;
pub mod error;
pub mod links;
pub mod output;
pub mod pipeline;
pub mod presence;
pub mod query;
pub mod remote;
pub mod store;
pub mod summary;
