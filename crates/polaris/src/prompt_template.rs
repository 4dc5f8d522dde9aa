use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use tera::{Context, Error as TeraError, Tera};

/// The built-in system prompt for cluster conversations
pub const SYSTEM_PROMPT: &str = include_str!("prompts/system.md");

/// Get the path to the prompts directory
fn prompts_dir() -> PathBuf {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    PathBuf::from(manifest_dir).join("src").join("prompts")
}

pub fn load_prompt<T: Serialize>(template: &str, context_data: &T) -> Result<String, TeraError> {
    let mut tera = Tera::default();
    tera.add_raw_template("inline_template", template)?;
    let context = Context::from_serialize(context_data)?;
    let rendered = tera.render("inline_template", &context)?;
    Ok(rendered)
}

pub fn load_prompt_file<T: Serialize>(
    template_file: impl Into<PathBuf>,
    context_data: &T,
) -> Result<String, TeraError> {
    let template_path = template_file.into();
    // relative names that don't exist fall back to the bundled prompts
    let file_path = if !template_path.exists() {
        prompts_dir().join(template_path)
    } else {
        template_path
    };

    let template_content = fs::read_to_string(file_path)
        .map_err(|e| TeraError::chain("Failed to read template file", e))?;
    load_prompt(&template_content, context_data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_load_prompt() {
        let template = "Cluster {{ name }} runs {{ version }}.";
        let mut context = HashMap::new();
        context.insert("name".to_string(), "prod".to_string());
        context.insert("version".to_string(), "v1.29.2".to_string());

        let result = load_prompt(template, &context).unwrap();
        assert_eq!(result, "Cluster prod runs v1.29.2.");
    }

    #[test]
    fn test_load_prompt_missing_variable() {
        let template = "Cluster {{ name }} runs {{ version }}.";
        let mut context = HashMap::new();
        context.insert("name".to_string(), "prod".to_string());
        assert!(load_prompt(template, &context).is_err());
    }

    #[test]
    fn test_load_prompt_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("custom.md");
        fs::write(&file_path, "Hello, {{ cluster_name }}!").unwrap();

        let mut context = HashMap::new();
        context.insert("cluster_name".to_string(), "prod".to_string());
        assert_eq!(load_prompt_file(&file_path, &context).unwrap(), "Hello, prod!");
    }

    #[test]
    fn test_bundled_prompt_by_name() {
        let context = serde_json::json!({
            "cluster_name": "prod",
            "cluster_version": "v1.29.2",
            "tools": [],
        });
        let from_file = load_prompt_file("system.md", &context).unwrap();
        let inline = load_prompt(SYSTEM_PROMPT, &context).unwrap();
        assert_eq!(from_file, inline);
        assert!(load_prompt_file("non_existent_template.txt", &context).is_err());
    }
}
