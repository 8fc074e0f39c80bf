//! Default values for configuration fields.
//!
//! These functions are used by serde for default deserialization.

// ============================================================================
// Common Defaults
// ============================================================================

pub fn r#true() -> bool {
    true
}

// ============================================================================
// [build] Section Defaults
// ============================================================================

pub mod build {
    use std::path::PathBuf;

    pub fn root() -> Option<PathBuf> {
        None
    }

    pub fn source() -> PathBuf {
        "src".into()
    }

    pub fn output() -> PathBuf {
        "dev".into()
    }

    pub fn dist() -> PathBuf {
        "dist".into()
    }

    pub fn ignore() -> Vec<String> {
        vec!["**/.DS_Store".into(), "**/Thumbs.db".into()]
    }

    pub mod scripts {
        use std::path::PathBuf;

        pub fn dir() -> PathBuf {
            "_ts".into()
        }
        pub fn output() -> PathBuf {
            "js".into()
        }
        pub fn libs() -> PathBuf {
            "js/libs".into()
        }
        pub fn command() -> Vec<String> {
            vec![
                "esbuild".into(),
                "--bundle".into(),
                "--format=iife".into(),
                "--log-level=warning".into(),
            ]
        }
    }

    pub mod styles {
        use std::path::PathBuf;

        pub fn dir() -> PathBuf {
            "_scss".into()
        }
        pub fn output() -> PathBuf {
            "css".into()
        }
        pub fn browsers() -> Vec<String> {
            vec![
                "last 2 versions".into(),
                "ie >= 11".into(),
                "ios >= 10".into(),
                "android >= 6".into(),
            ]
        }
    }

    pub mod templates {
        pub fn command() -> Vec<String> {
            vec!["ejs".into()]
        }
    }

    pub mod images {
        use std::path::PathBuf;

        pub fn dir() -> PathBuf {
            "images".into()
        }
        pub fn png_quality() -> [u8; 2] {
            [85, 90]
        }
        pub fn png_speed() -> i32 {
            1
        }
        pub fn jpeg_quality() -> u8 {
            90
        }
        pub fn gif_command() -> Vec<String> {
            vec!["gifsicle".into(), "--optimize=1".into()]
        }
    }
}

// ============================================================================
// [pipeline] Section Defaults
// ============================================================================

pub mod pipeline {
    use crate::pipeline::Transform;

    pub fn development() -> Vec<Transform> {
        vec![
            Transform::Scripts,
            Transform::Styles,
            Transform::Templates,
            Transform::Images,
        ]
    }

    pub fn production() -> Vec<Transform> {
        vec![
            Transform::Styles,
            Transform::Templates,
            Transform::Scripts,
            Transform::Images,
        ]
    }
}

// ============================================================================
// [serve] Section Defaults
// ============================================================================

pub mod serve {
    pub fn interface() -> String {
        "127.0.0.1".into()
    }

    pub fn port() -> u16 {
        8000
    }

    pub fn start_path() -> String {
        "/".into()
    }
}
