use crate::utils::error::{MonitorError, Result};
use std::fs;
use std::path::Path;

/// 將環境變數提供的服務帳戶 JSON 寫到憑證路徑，寫完改成唯讀
pub fn materialize_service_account(json: &str, path: &Path) -> Result<()> {
    serde_json::from_str::<serde_json::Value>(json)
        .map_err(|e| MonitorError::config(format!("GOOGLE_CREDENTIALS is not valid JSON: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    if path.exists() {
        // 之前留下的唯讀檔要先解除才能覆寫
        let mut permissions = fs::metadata(path)?.permissions();
        #[allow(clippy::permissions_set_readonly_false)]
        permissions.set_readonly(false);
        fs::set_permissions(path, permissions)?;
    }

    fs::write(path, json)?;

    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(true);
    fs::set_permissions(path, permissions)?;

    tracing::info!("🔑 Google credentials written to {}", path.display());
    Ok(())
}
