// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use lumen_core::consts;
use lumen_render::PresentMode;
use serde::Deserialize;
use tracing::info;

pub const DEFAULT_CONFIG: &str = "lumen.toml";
pub const DEFAULT_MESH: &str = "assets/mesh.obj";

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WindowCfg {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            width: consts::WINDOW_WIDTH,
            height: consts::WINDOW_HEIGHT,
            title: consts::WINDOW_TITLE.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeCfg {
    #[default]
    Fifo,
    Mailbox,
}

impl From<PresentModeCfg> for PresentMode {
    fn from(m: PresentModeCfg) -> Self {
        match m {
            PresentModeCfg::Fifo => PresentMode::Fifo,
            PresentModeCfg::Mailbox => PresentMode::Mailbox,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RenderCfg {
    /// 0 turns the limiter off.
    pub target_fps: u32,
    pub desired_image_count: u32,
    pub present_mode: PresentModeCfg,
    pub clear_color: [f32; 4],
    /// Directory holding `mesh.vert.spv` and `mesh.frag.spv`.
    pub shader_dir: Option<PathBuf>,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            target_fps: consts::TARGET_FPS,
            desired_image_count: consts::DESIRED_IMAGE_COUNT,
            present_mode: PresentModeCfg::Fifo,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            shader_dir: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SceneCfg {
    pub mesh: PathBuf,
}

impl Default for SceneCfg {
    fn default() -> Self {
        SceneCfg {
            mesh: PathBuf::from(DEFAULT_MESH),
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub render: RenderCfg,
    pub scene: SceneCfg,
}

pub fn parse_cfg(text: &str) -> Result<AppCfg> {
    Ok(toml::from_str::<AppCfg>(text)?)
}

/// A missing file means defaults. A file that exists but does not parse is
/// an error rather than being silently ignored.
pub fn load_cfg(path: &Path) -> Result<AppCfg> {
    match fs::read_to_string(path) {
        Ok(s) => {
            let cfg = parse_cfg(&s).with_context(|| format!("parsing {}", path.display()))?;
            info!("config loaded from {}", path.display());
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("no {} found, using defaults", path.display());
            Ok(AppCfg::default())
        }
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = parse_cfg("").unwrap();
        assert_eq!(cfg, AppCfg::default());
        assert_eq!(cfg.window.width, 640);
        assert_eq!(cfg.window.height, 480);
        assert_eq!(cfg.render.target_fps, 60);
        assert_eq!(cfg.render.desired_image_count, 3);
        assert_eq!(cfg.render.present_mode, PresentModeCfg::Fifo);
        assert_eq!(cfg.scene.mesh, PathBuf::from(DEFAULT_MESH));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = parse_cfg(
            r#"
            [window]
            title = "demo"

            [render]
            target_fps = 0
            present_mode = "mailbox"
            shader_dir = "spv"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.window.title, "demo");
        assert_eq!(cfg.window.width, 640);
        assert_eq!(cfg.render.target_fps, 0);
        assert_eq!(PresentMode::from(cfg.render.present_mode), PresentMode::Mailbox);
        assert_eq!(cfg.render.shader_dir, Some(PathBuf::from("spv")));
        assert_eq!(cfg.render.clear_color, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn unknown_present_mode_is_rejected() {
        assert!(parse_cfg("[render]\npresent_mode = \"immediate\"").is_err());
    }

    #[test]
    fn missing_file_is_default_but_bad_file_is_error() {
        let dir = std::env::temp_dir().join(format!("lumen-cfg-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let missing = dir.join("nope.toml");
        assert_eq!(load_cfg(&missing).unwrap(), AppCfg::default());

        let bad = dir.join("bad.toml");
        fs::write(&bad, "[window]\nwidth = \"wide\"").unwrap();
        assert!(load_cfg(&bad).is_err());

        fs::remove_dir_all(&dir).ok();
    }
}
