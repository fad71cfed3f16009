use std::{borrow::Cow, rc::Rc};

use crate::record::{ErrorSnapshot, Record};

/// Picks the level name for a finished exchange.
///
/// Names the backend does not know are written at `info`.
pub type LevelFn = Rc<dyn Fn(u16, Option<&ErrorSnapshot>, &Record) -> Cow<'static, str>>;

/// `error` for errors and 5xx, `warn` for 4xx, `info` otherwise.
pub fn default_level(status: u16, err: Option<&ErrorSnapshot>, _record: &Record) -> Cow<'static, str> {
    if err.is_some() || status >= 500 {
        Cow::Borrowed("error")
    } else if status >= 400 {
        Cow::Borrowed("warn")
    } else {
        Cow::Borrowed("info")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_level() {
        let rec = Record::new();
        assert_eq!(default_level(200, None, &rec), "info");
        assert_eq!(default_level(302, None, &rec), "info");
        assert_eq!(default_level(404, None, &rec), "warn");
        assert_eq!(default_level(500, None, &rec), "error");
        assert_eq!(default_level(503, None, &rec), "error");

        let err = ErrorSnapshot::new("boom", "Boom", 200);
        assert_eq!(default_level(200, Some(&err), &rec), "error");
    }
}
