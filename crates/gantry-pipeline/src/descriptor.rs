//! Deployment descriptors.
//!
//! The task-definition template (JSON) and rollout spec template
//! (YAML) live in the source tree and carry a placeholder token for
//! the image reference. Rendering substitutes the built image; a
//! template without the token is authored wrong and is rejected rather
//! than deployed verbatim.

use gantry_core::ImageRef;

use crate::error::StageError;

/// Token the templates must carry where the image reference goes.
pub const IMAGE_PLACEHOLDER: &str = "<IMAGE_NAME>";

/// Substitute the image into a template. `label` names the template in
/// errors.
pub fn render(template: &str, label: &str, image: &ImageRef) -> Result<String, StageError> {
    if !template.contains(IMAGE_PLACEHOLDER) {
        return Err(StageError::MissingPlaceholder {
            path: label.to_string(),
        });
    }
    Ok(template.replace(IMAGE_PLACEHOLDER, &image.uri()))
}

/// Render and parse the task-definition template.
pub fn render_task_definition(
    template: &str,
    label: &str,
    image: &ImageRef,
) -> Result<serde_json::Value, StageError> {
    let rendered = render(template, label, image)?;
    serde_json::from_str(&rendered).map_err(|e| StageError::MalformedDescriptor {
        path: label.to_string(),
        reason: e.to_string(),
    })
}

/// Render and parse the rollout spec template.
pub fn render_rollout_spec(
    template: &str,
    label: &str,
    image: &ImageRef,
) -> Result<serde_yaml::Value, StageError> {
    let rendered = render(template, label, image)?;
    serde_yaml::from_str(&rendered).map_err(|e| StageError::MalformedDescriptor {
        path: label.to_string(),
        reason: e.to_string(),
    })
}
