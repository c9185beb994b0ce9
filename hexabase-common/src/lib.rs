// Copyright 2026 Hexabase contributors
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

pub mod config;
pub mod error;
pub mod ids;
pub mod metrics;
pub mod retry;
pub mod safe_display;
pub mod tracing_setup;

#[cfg(test)]
test_r::enable!();

pub use error::{ErrorKind, HexabaseError};
pub use safe_display::SafeDisplay;
