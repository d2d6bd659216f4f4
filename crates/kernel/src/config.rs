// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Render configuration, supplied by the embedder when it builds an environment.

use eyre::eyre;
use figment::Figment;
use figment::providers::{Format, Json, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Whether a region whose re-evaluation fails gets one re-render from its own start before
    /// the failure is passed on to its parent.
    pub recover_from_exceptions: bool,
    /// Log every executed opcode at `trace` level.
    pub trace_opcodes: bool,
    /// Frame pushes beyond this depth fail the render with a stack overflow.
    pub max_frame_depth: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            recover_from_exceptions: true,
            trace_opcodes: false,
            max_frame_depth: 1024,
        }
    }
}

impl RenderConfig {
    /// Load a configuration file over the defaults. Files ending in `.json` are read as JSON,
    /// anything else as YAML.
    pub fn load(path: &Path) -> Result<Self, eyre::Report> {
        let f = Figment::new().merge(Serialized::defaults(RenderConfig::default()));
        let f = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => f.merge(Json::file(path)),
            _ => f.merge(Yaml::file(path)),
        };
        f.extract::<RenderConfig>()
            .map_err(|e| eyre!("Failed to parse render configuration from {:?}: {}", path, e))
    }
}
