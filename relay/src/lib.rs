//
// Copyright 2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

pub mod audio;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod encryption;
pub mod payload;
pub mod player;
pub mod rtp;
pub mod transcoder;
pub mod udp_server;
pub mod vp8;
