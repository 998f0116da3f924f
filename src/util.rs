use std::io::Write;
use std::sync::Once;

use env_logger::Builder;

static INIT: Once = Once::new();

/// Configure the `env_logger` backend for the `log` facade used throughout
/// the store. Safe to call more than once; only the first call takes
/// effect.
pub fn init_logging() {
    INIT.call_once(|| {
        let mut builder = Builder::from_default_env();
        builder
            .format_timestamp_millis()
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{} {}] {}",
                    record.level(),
                    record.target(),
                    record.args()
                )
            })
            .init();
    });
}
