pub mod password {

    pub const DEFAULT_PASSWORD_LEN: usize = 25;

    /// One character per required class.
    pub const MIN_COMPLEX_PASSWORD_LEN: usize = 4;

    pub const MAX_PASSWORD_LEN: usize = 1024;

    pub const DEFAULT_MIN_PASSWORD_LEN: usize = 15;

    pub const DEFAULT_ROTATION_PERIOD_DAYS: u32 = 60;
}

pub mod postgres {

    /// Extensions ensured on every provisioned database.
    pub const EXTENSIONS: &[&str] = &["citext", "uuid-ossp", "pgcrypto"];

    /// SQLSTATE `duplicate_object`.
    pub const DUPLICATE_OBJECT: &str = "42710";

    pub const MAINTENANCE_DATABASE: &str = "postgres";

    pub const DEFAULT_PORT: u16 = 5432;

    pub const DEFAULT_SSLMODE: &str = "require";
}

pub mod intervals {
    use std::time::Duration;

    pub const OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

    pub const BACKOFF_BASE: Duration = Duration::from_millis(500);

    pub const BACKOFF_MAX: Duration = Duration::from_secs(300);

    pub const RESYNC: Duration = Duration::from_secs(300);

    /// Rest after a claim exhausts its back-to-back progress passes.
    pub const PROGRESS_PAUSE: Duration = Duration::from_secs(1);
}

pub mod limits {

    pub const MAX_CONCURRENT_RECONCILES: usize = 4;

    /// Back-to-back progress passes allowed before a claim is paused.
    pub const MAX_PROGRESS_PASSES: usize = 16;

    pub const EVENT_BUFFER_SIZE: usize = 64;
}
