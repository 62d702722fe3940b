//! `om`: drive an Ops Manager appliance from the command line.
//!
//! The binary is a thin shell over [`dispatcher::dispatch`]; everything else
//! lives in the library so commands can be tested against mock appliances.

pub mod api;
pub mod commands;
pub mod configtemplate;
pub mod dispatcher;
pub mod download;
pub mod error;
pub mod extractor;
pub mod formcontent;
pub mod interpolate;
pub mod network;
pub mod options;
pub mod poller;
pub mod presenters;
pub mod target;
pub mod ui;
