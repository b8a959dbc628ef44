// SPDX-License-Identifier: Apache-2.0
pub mod app;
pub mod campaign;
pub mod cleaner;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
