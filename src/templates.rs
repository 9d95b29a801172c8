use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::TemplateDescriptor;

/// Builtin templates written into the templates directory on `init` so the
/// tool works before the user designs their own.
const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    ("modern", include_str!("../assets/templates/modern.html")),
    ("classic", include_str!("../assets/templates/classic.html")),
];

/// Letter templates live as plain `.html` files in one directory; the file
/// stem is the template id. The directory is rescanned on every list so a
/// freshly dropped-in file shows up without a restart.
pub struct TemplateStore {
    dir: PathBuf,
}

impl TemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write the builtin templates, skipping any file the user already has.
    pub fn seed_builtins(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        for (id, markup) in BUILTIN_TEMPLATES {
            let path = self.dir.join(format!("{id}.html"));
            if !path.exists() {
                std::fs::write(&path, markup)?;
                debug!(id, "builtin template written");
            }
        }
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<TemplateDescriptor>> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }
        let mut templates = vec![];
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("html") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                templates.push(TemplateDescriptor {
                    id: stem.to_string(),
                    display_name: display_name(stem),
                });
            }
        }
        templates.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(templates)
    }

    pub fn load(&self, id: &str) -> Result<String> {
        // Template ids map straight to file names; anything that could walk
        // out of the templates directory is rejected up front.
        if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            return Err(Error::validation(
                "template_id",
                format!("invalid template id '{id}'"),
            ));
        }
        let path = self.dir.join(format!("{id}.html"));
        if !path.exists() {
            return Err(Error::not_found("template", id));
        }
        Ok(std::fs::read_to_string(&path)?)
    }
}

fn display_name(id: &str) -> String {
    id.split(['-', '_'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
