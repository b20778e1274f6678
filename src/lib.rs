// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A concurrent static-file HTTP/1.1 server.
//!
//! A single admitter ([`server::Server`]) owns the listening socket and
//! forks a fixed pool of worker processes ([`worker::Worker`]), handing each
//! accepted connection to one of them through a bounded admission queue
//! ([`queue::AdmissionQueue`]) backed by shared memory, named semaphores,
//! and `SCM_RIGHTS` file-descriptor passing. Each worker process runs its
//! own bounded thread pool ([`pool::ThreadPool`]) and LRU file cache
//! ([`cache::Cache`]); pool threads run the request handler state machine
//! ([`handler::handle`]), which parses, resolves, serves, and records every
//! request exactly once.
//!
//! See `DESIGN.md` for the cross-process primitives ([`ipc`]) this is built
//! on and how they ground in the source specification's own IPC.

pub mod access_log;
pub mod cache;
pub mod config;
pub mod conn;
pub mod date;
pub mod handler;
pub mod ipc;
pub mod mime;
pub mod net;
pub mod parser;
pub mod pool;
pub mod queue;
pub mod server;
pub mod stats;
pub mod worker;
