use std::env;
use std::path::PathBuf;

fn fallback_dotenv_path(vault_root: Option<PathBuf>, home_dir: Option<PathBuf>) -> Option<PathBuf> {
    let base = vault_root.or(home_dir)?;
    Some(base.join(".env"))
}

pub fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let fallback = fallback_dotenv_path(
        env::var_os("CHANVAULT_ROOT").map(PathBuf::from),
        dirs::home_dir(),
    );

    let Some(path) = fallback else {
        return;
    };
    if path.is_file() {
        let _ = dotenvy::from_path(&path);
    }
}

#[cfg(test)]
mod tests {
    use super::fallback_dotenv_path;
    use std::path::PathBuf;

    #[test]
    fn fallback_prefers_vault_root_over_home() {
        let got = fallback_dotenv_path(
            Some(PathBuf::from("/exports")),
            Some(PathBuf::from("/home/alice")),
        );

        let want = Some(PathBuf::from("/exports/.env"));
        assert_eq!(got, want);
    }

    #[test]
    fn fallback_uses_home_when_vault_root_unset() {
        let got = fallback_dotenv_path(None, Some(PathBuf::from("/home/alice")));
        let want = Some(PathBuf::from("/home/alice/.env"));
        assert_eq!(got, want);
    }
}
