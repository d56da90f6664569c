pub struct EntryName;

impl EntryName {
    /// Suffix of in-progress downloads inside the staging directory.
    pub const PARTIAL_SUFFIX: &'static str = ".part";

    /// A remote name may only ever land directly inside the staging directory.
    /// Leading dots are reserved for temporary files.
    pub fn verify_safe(name: &str) -> Result<(), String> {
        if name.is_empty() {
            return Err("empty entry name".into());
        }
        if name == "." || name == ".." {
            return Err(format!("entry name contains parent traversal: {name}"));
        }
        if name.contains('/') || name.contains('\\') || name.contains('\0') {
            return Err(format!("entry name contains a path separator: {name}"));
        }
        if name.starts_with('.') {
            return Err(format!("hidden entry names are reserved: {name}"));
        }
        if name.len() > 1 && name.chars().nth(1) == Some(':') {
            return Err(format!("entry name appears absolute: {name}"));
        }
        Ok(())
    }

    /// Temporary name a download is written under before the final rename.
    pub fn partial(name: &str) -> String {
        format!(".{name}{}", Self::PARTIAL_SUFFIX)
    }

    pub fn is_partial(file_name: &str) -> bool {
        file_name.starts_with('.') && file_name.ends_with(Self::PARTIAL_SUFFIX)
    }

    /// Join a remote directory and entry name using forward slashes.
    pub fn remote_path(dir: &str, name: &str) -> String {
        let dir = dir.replace('\\', "/");
        if dir.is_empty() || dir == "." {
            name.to_string()
        } else if dir.ends_with('/') {
            format!("{dir}{name}")
        } else {
            format!("{dir}/{name}")
        }
    }
}
