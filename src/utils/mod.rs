pub mod logging;

/// Human-readable byte count.
pub fn format_file_size(size_bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let size = size_bytes as f64;
    if size < KB {
        format!("{size_bytes} B")
    } else if size < KB * KB {
        format!("{:.1} KB", size / KB)
    } else if size < KB * KB * KB {
        format!("{:.1} MB", size / (KB * KB))
    } else {
        format!("{:.1} GB", size / (KB * KB * KB))
    }
}

/// Human-readable duration.
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{seconds:.1}s")
    } else if seconds < 3600.0 {
        let minutes = (seconds / 60.0) as u64;
        format!("{}m {:.1}s", minutes, seconds % 60.0)
    } else {
        let hours = (seconds / 3600.0) as u64;
        let minutes = ((seconds % 3600.0) / 60.0) as u64;
        format!("{}h {}m {:.1}s", hours, minutes, seconds % 60.0)
    }
}

/// Seconds on the air for `data_size` bytes at `bitrate` bits per second.
pub fn estimate_transmission_time(data_size: u64, bitrate: u32) -> f64 {
    (data_size * 8) as f64 / bitrate.max(1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_sizes() {
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(2048), "2.0 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_file_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(12.34), "12.3s");
        assert_eq!(format_duration(125.0), "2m 5.0s");
        assert_eq!(format_duration(3725.0), "1h 2m 5.0s");
    }

    #[test]
    fn transmission_time() {
        assert_eq!(estimate_transmission_time(1000, 80_000), 0.1);
    }
}
