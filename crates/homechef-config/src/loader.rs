//! Multi-file configuration loading.
//!
//! A root file may name other files with `include = "a.toml"` or
//! `include = ["a.toml", "b.toml"]`. Included files cannot include further
//! files, and a top-level section may appear in only one file.

use crate::{resolve_env_vars, Config, ConfigError};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// One parsed file with its environment variables resolved.
struct Fragment {
	path: PathBuf,
	table: toml::map::Map<String, toml::Value>,
}

/// Loads a root configuration file together with its includes.
pub struct ConfigLoader {
	base_dir: PathBuf,
	visited: HashSet<PathBuf>,
}

impl ConfigLoader {
	pub fn new(base_dir: impl AsRef<Path>) -> Self {
		Self {
			base_dir: base_dir.as_ref().to_path_buf(),
			visited: HashSet::new(),
		}
	}

	/// Reads `file` (relative to the base directory), merges its includes
	/// and returns the validated configuration.
	pub async fn load_config(&mut self, file: impl AsRef<Path>) -> Result<Config, ConfigError> {
		let mut root = self.read_fragment(file.as_ref()).await?;
		let includes = take_includes(&mut root.table)?;

		let mut origin: BTreeMap<String, PathBuf> = root
			.table
			.keys()
			.map(|section| (section.clone(), root.path.clone()))
			.collect();

		for include in includes {
			let fragment = self.read_fragment(&include).await?;
			if fragment.table.contains_key("include") {
				return Err(ConfigError::Validation(format!(
					"Nested includes are not supported ({})",
					fragment.path.display()
				)));
			}
			for (section, value) in fragment.table {
				if let Some(first) = origin.get(&section) {
					return Err(ConfigError::Validation(format!(
						"Duplicate section '{}' found in {} and {}. \
						Each top-level section must be unique across all configuration files.",
						section,
						first.display(),
						fragment.path.display()
					)));
				}
				origin.insert(section.clone(), fragment.path.clone());
				root.table.insert(section, value);
			}
		}

		let config: Config = toml::Value::Table(root.table).try_into()?;
		config.validate()?;
		Ok(config)
	}

	async fn read_fragment(&mut self, file: &Path) -> Result<Fragment, ConfigError> {
		let path = if file.is_absolute() {
			file.to_path_buf()
		} else {
			self.base_dir.join(file)
		};

		let canonical = tokio::fs::canonicalize(&path).await.map_err(|e| {
			ConfigError::Io(std::io::Error::new(
				e.kind(),
				format!("Configuration file not found: {} ({})", path.display(), e),
			))
		})?;
		if !self.visited.insert(canonical.clone()) {
			return Err(ConfigError::Validation(format!(
				"Circular include detected: {} was already loaded",
				canonical.display()
			)));
		}

		let raw = tokio::fs::read_to_string(&canonical).await?;
		let table = match toml::from_str::<toml::Value>(&resolve_env_vars(&raw)?)? {
			toml::Value::Table(table) => table,
			_ => {
				return Err(ConfigError::Parse(format!(
					"{} must contain a table",
					path.display()
				)))
			},
		};
		Ok(Fragment { path, table })
	}
}

/// Removes and returns the `include` directive of a root table.
fn take_includes(
	table: &mut toml::map::Map<String, toml::Value>,
) -> Result<Vec<PathBuf>, ConfigError> {
	match table.remove("include") {
		None => Ok(Vec::new()),
		Some(toml::Value::String(file)) => Ok(vec![PathBuf::from(file)]),
		Some(toml::Value::Array(files)) => files
			.into_iter()
			.map(|file| match file {
				toml::Value::String(file) => Ok(PathBuf::from(file)),
				_ => Err(ConfigError::Validation(
					"Include array must contain only strings".into(),
				)),
			})
			.collect(),
		Some(_) => Err(ConfigError::Validation(
			"Include must be a string or array of strings".into(),
		)),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use tempfile::TempDir;

	const ENGINE: &str = r#"
[engine]
id = "homechef-test"
"#;

	const STORAGE: &str = r#"
[storage]
primary = "memory"
cleanup_interval_seconds = 3600
[storage.implementations.memory]
"#;

	#[tokio::test]
	async fn test_single_file_config() {
		let temp_dir = TempDir::new().unwrap();
		let config_path = temp_dir.path().join("config.toml");
		fs::write(&config_path, format!("{}{}", ENGINE, STORAGE)).unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let config = loader.load_config("config.toml").await.unwrap();
		assert_eq!(config.engine.id, "homechef-test");
		assert_eq!(config.storage.primary, "memory");
	}

	#[tokio::test]
	async fn test_config_with_includes() {
		let temp_dir = TempDir::new().unwrap();
		fs::write(
			temp_dir.path().join("main.toml"),
			format!("include = [\"storage.toml\", \"sinks.toml\"]\n{}", ENGINE),
		)
		.unwrap();
		fs::write(temp_dir.path().join("storage.toml"), STORAGE).unwrap();
		fs::write(
			temp_dir.path().join("sinks.toml"),
			"[sinks.implementations.log]\ninclude_payload = true\n",
		)
		.unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let config = loader.load_config("main.toml").await.unwrap();
		assert_eq!(config.storage.cleanup_interval_seconds, 3600);
		assert!(config.sinks.implementations.contains_key("log"));
	}

	#[tokio::test]
	async fn test_duplicate_section_error() {
		let temp_dir = TempDir::new().unwrap();
		fs::write(
			temp_dir.path().join("main.toml"),
			format!("include = [\"storage.toml\"]\n{}{}", ENGINE, STORAGE),
		)
		.unwrap();
		fs::write(temp_dir.path().join("storage.toml"), STORAGE).unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let err = loader.load_config("main.toml").await.unwrap_err();
		assert!(err.to_string().contains("Duplicate section 'storage'"));
	}

	#[tokio::test]
	async fn test_self_include_detection() {
		let temp_dir = TempDir::new().unwrap();
		fs::write(
			temp_dir.path().join("main.toml"),
			format!("include = [\"main.toml\"]\n{}{}", ENGINE, STORAGE),
		)
		.unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let err = loader.load_config("main.toml").await.unwrap_err();
		assert!(err.to_string().contains("Circular include"));
	}

	#[tokio::test]
	async fn test_env_vars_resolved_in_included_files() {
		std::env::set_var("HC_LOADER_ENGINE_ID", "from-env");
		let temp_dir = TempDir::new().unwrap();
		fs::write(
			temp_dir.path().join("main.toml"),
			"include = \"engine.toml\"\n".to_string() + STORAGE,
		)
		.unwrap();
		fs::write(
			temp_dir.path().join("engine.toml"),
			"[engine]\nid = \"${HC_LOADER_ENGINE_ID}\"\n",
		)
		.unwrap();

		let config = crate::Config::from_file(
			temp_dir.path().join("main.toml").to_str().unwrap(),
		)
		.await
		.unwrap();
		assert_eq!(config.engine.id, "from-env");
		std::env::remove_var("HC_LOADER_ENGINE_ID");
	}
}
