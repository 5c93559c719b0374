// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod backend;
pub mod config;
pub mod error;
pub mod event;
pub mod gatekeeper;
pub mod inactivity;
pub mod keeper;
pub mod logout;
pub mod policy;
pub mod prompt;
pub mod refresh;
pub mod run;
pub mod teardown;
pub mod terminal;
pub mod test_support;
pub mod tracker;
pub mod user_store;
