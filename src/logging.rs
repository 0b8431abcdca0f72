use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: OnceCell<()> = OnceCell::new();

/// Install the default tracing subscriber. Safe to call more than once;
/// only the first call takes effect.
pub fn init_tracing() {
    INIT.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,reqwest=warn,hyper=warn"));

        fmt().with_env_filter(env_filter).with_target(false).init();
    });
}
