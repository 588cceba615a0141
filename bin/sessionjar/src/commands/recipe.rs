use serde_json::json;
use sessionjar_core::{Paths, Recipe};

use super::{load_config, print_json};

pub struct SaveArgs {
    pub name: String,
    pub hint: Option<String>,
    pub url: Option<String>,
    pub url_contains: Option<String>,
    pub method: Option<String>,
}

/// Snapshot the configured capture and replay sections under `name`.
pub fn save(args: SaveArgs) -> anyhow::Result<()> {
    let (paths, config) = load_config()?;
    let mut capture = config.capture.clone();
    let mut replay = config.replay.clone();

    if args.hint.is_some() {
        capture.target_hint = args.hint;
    }
    if let Some(url) = args.url {
        replay.request_url = url;
    }
    replay.url_contains = args.url_contains.or(replay.url_contains);
    if let Some(method) = args.method {
        replay.method = method;
    }

    let path = Recipe::new(args.name.clone(), capture, replay).save(&paths.recipes_dir())?;
    print_json(&json!({ "name": args.name, "path": path.display().to_string() }))
}

pub fn list() -> anyhow::Result<()> {
    let paths = Paths::new();
    print_json(&Recipe::list(&paths.recipes_dir())?)
}

pub fn show(name: &str) -> anyhow::Result<()> {
    let paths = Paths::new();
    print_json(&Recipe::load(&paths.recipes_dir(), name)?)
}

/// Named recipe, when one was asked for.
pub fn load_named(paths: &Paths, name: Option<&str>) -> anyhow::Result<Option<Recipe>> {
    Ok(name
        .map(|n| Recipe::load(&paths.recipes_dir(), n))
        .transpose()?)
}
