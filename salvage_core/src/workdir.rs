use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Creates `wtmp<N>` under `base` for the first free N, starting at 1.
///
/// Returns the directory name, not the full path.
pub fn create_wtmp_dir(base: &Path) -> std::io::Result<String> {
    let mut n: u32 = 1;
    loop {
        let name = format!("wtmp{n}");
        match fs::create_dir(base.join(&name)) {
            Ok(()) => {
                log::debug!("Created {name} under {base:?}");
                return Ok(name);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e),
        }
    }
}
