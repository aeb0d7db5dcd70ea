use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use std::path::Path;

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, io::Error> {
    let json = std::fs::read_to_string(path)?;
    serde_json::from_str(&json).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

pub fn read_json_if_exists<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, io::Error> {
    if !path.exists() {
        return Ok(None);
    }
    read_json(path).map(Some)
}

pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T, io::Error> {
    match read_json_if_exists(path)? {
        Some(value) => Ok(value),
        None => Ok(T::default()),
    }
}

/// Write `value` as pretty JSON via a sibling temp file and rename.
///
/// The temp file keeps the target's full name plus a random suffix, so
/// records with non-JSON extensions (`users/<id>.conf`) never collide and
/// concurrent writers of one target never share a temp file.
pub fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<(), io::Error> {
    write_atomic(path, value, false)
}

/// Write `value` like [`write_json_pretty`], owner read/write only.
pub fn write_json_private<T: Serialize>(path: &Path, value: &T) -> Result<(), io::Error> {
    write_atomic(path, value, true)
}

fn write_atomic<T: Serialize>(path: &Path, value: &T, private: bool) -> Result<(), io::Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
    std::fs::write(&tmp, json)?;

    #[cfg(unix)]
    if private {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    let _ = private;

    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::temp_dir;

    #[test]
    fn read_json_invalid_returns_invalid_data() {
        let dir = temp_dir("persist-invalid");
        let path = dir.join("bad.json");
        std::fs::write(&path, "{broken json").unwrap();

        let err = read_json::<serde_json::Value>(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn read_json_or_default_missing_returns_default() {
        let dir = temp_dir("persist-missing");
        let path = dir.join("missing.json");

        let value: Vec<String> = read_json_or_default(&path).unwrap();
        assert!(value.is_empty());
    }

    #[test]
    fn write_json_pretty_creates_parent_dir() {
        let path = temp_dir("persist-write").join("nested").join("value.conf");
        write_json_pretty(&path, &vec!["a", "b"]).unwrap();
        assert!(path.exists());

        let back: Vec<String> = read_json(&path).unwrap();
        assert_eq!(back, vec!["a", "b"]);
    }

    #[test]
    fn write_json_pretty_leaves_no_temp_file() {
        let dir = temp_dir("persist-tmp");
        let path = dir.join("record.conf");
        write_json_pretty(&path, &42u32).unwrap();

        let names: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn write_json_pretty_fails_on_directory_path() {
        let dir = temp_dir("persist-dir");

        let result = write_json_pretty(&dir, &vec!["a"]);
        assert!(result.is_err());
    }

    #[test]
    fn concurrent_writers_of_one_target_all_succeed() {
        let path = temp_dir("persist-race").join("shared.json");
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let path = path.clone();
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        write_json_pretty(&path, &i).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let last: u32 = read_json(&path).unwrap();
        assert!(last < 8);
    }

    #[cfg(unix)]
    #[test]
    fn write_json_private_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let path = temp_dir("persist-private").join("secret.conf");
        write_json_private(&path, &"shh").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
