//! Collects build-time information for the run metadata file.

fn main() {
    built::write_built_file().expect("Failed to acquire build-time information");
}
