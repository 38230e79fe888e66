//! Browser host for the taskboard stores:
//! `localStorage`, cross-tab `storage`
//! events, `matchMedia` and `setTimeout`.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use chrono::{
  DateTime,
  Utc
};
use chrono_tz::Tz;
use gloo::events::EventListener;
use gloo::timers::callback::Timeout;
use taskboard_core::app::{
  App,
  Host
};
use taskboard_core::datetime::parse_timezone;
use taskboard_core::runtime::{
  Clock,
  Deferred,
  Scheduler
};
use taskboard_core::storage::{
  LocalStore,
  StorageBackend,
  StorageError,
  StorageEvent,
  StorageEventBus,
  entry_size
};
use taskboard_core::ui::{
  ColorSchemeWatch,
  DisplayAdapter,
  SchemeListener
};
use tracing::{
  debug,
  info,
  warn
};
use wasm_bindgen::prelude::*;

const DARK_QUERY: &str =
  "(prefers-color-scheme: dark)";
const DARK_CLASS: &str = "dark";
const LEGACY_QUOTA_CODE: u16 = 22;

struct Page {
  app:     App,
  _bridge: StorageEventBridge
}

thread_local! {
  static PAGE: RefCell<Option<Page>> =
    const { RefCell::new(None) };
}

/// Browsers disagree on how a full
/// storage area is reported.
fn is_quota_error(
  name: &str,
  code: u16
) -> bool {
  matches!(
    name,
    "QuotaExceededError"
      | "NS_ERROR_DOM_QUOTA_REACHED"
  ) || code == LEGACY_QUOTA_CODE
}

fn describe(err: &JsValue) -> String {
  err
    .as_string()
    .or_else(|| {
      err
        .dyn_ref::<web_sys::DomException>(
        )
        .map(|ex| ex.message())
    })
    .unwrap_or_else(|| {
      format!("{err:?}")
    })
}

pub struct WebStorageBackend {
  storage: web_sys::Storage
}

impl WebStorageBackend {
  pub fn local() -> Option<Self> {
    let storage = web_sys::window()?
      .local_storage()
      .ok()
      .flatten()?;
    Some(Self {
      storage
    })
  }
}

impl StorageBackend for WebStorageBackend {
  fn get_item(
    &self,
    key: &str
  ) -> Result<Option<String>, StorageError>
  {
    self.storage.get_item(key).map_err(
      |err| {
        StorageError::Backend(describe(
          &err
        ))
      }
    )
  }

  fn set_item(
    &self,
    key: &str,
    value: &str
  ) -> Result<(), StorageError> {
    self
      .storage
      .set_item(key, value)
      .map_err(|err| {
        let quota = err
          .dyn_ref::<web_sys::DomException>(
          )
          .is_some_and(|ex| {
            is_quota_error(
              &ex.name(),
              ex.code()
            )
          });
        if quota {
          StorageError::QuotaExceeded {
            key:   key.to_string(),
            bytes: entry_size(
              key, value
            )
          }
        } else {
          StorageError::Backend(describe(
            &err
          ))
        }
      })
  }

  fn remove_item(
    &self,
    key: &str
  ) -> Result<(), StorageError> {
    self.storage.remove_item(key).map_err(
      |err| {
        StorageError::Backend(describe(
          &err
        ))
      }
    )
  }

  fn keys(
    &self
  ) -> Result<Vec<String>, StorageError> {
    let len =
      self.storage.length().map_err(
        |err| {
          StorageError::Backend(describe(
            &err
          ))
        }
      )?;
    let mut keys =
      Vec::with_capacity(len as usize);
    for index in 0..len {
      if let Ok(Some(key)) =
        self.storage.key(index)
      {
        keys.push(key);
      }
    }
    Ok(keys)
  }
}

/// Forwards `storage` events fired by
/// other tabs into a store's event bus.
/// Dropping the bridge removes the
/// listener.
pub struct StorageEventBridge {
  _listener: EventListener
}

impl StorageEventBridge {
  pub fn connect(
    window: &web_sys::Window,
    bus: Rc<StorageEventBus>
  ) -> Self {
    let listener = EventListener::new(
      window,
      "storage",
      move |event| {
        let Some(event) = event
          .dyn_ref::<web_sys::StorageEvent>(
          )
        else {
          return;
        };
        debug!(key = ?event.key(), "storage event from another tab");
        bus.dispatch(&StorageEvent {
          key:       event.key(),
          new_value: event.new_value()
        });
      }
    );
    Self {
      _listener: listener
    }
  }
}

pub struct BrowserDisplay {
  window: web_sys::Window
}

impl BrowserDisplay {
  pub fn new(
    window: web_sys::Window
  ) -> Self {
    Self {
      window
    }
  }

  fn dark_query(
    &self
  ) -> Option<web_sys::MediaQueryList> {
    self
      .window
      .match_media(DARK_QUERY)
      .ok()
      .flatten()
  }
}

impl DisplayAdapter for BrowserDisplay {
  fn apply_dark_mode(&self, dark: bool) {
    let root = self
      .window
      .document()
      .and_then(|doc| {
        doc.document_element()
      });
    let Some(root) = root else {
      warn!("no document element; cannot apply theme");
      return;
    };
    if let Err(err) = root
      .class_list()
      .toggle_with_force(DARK_CLASS, dark)
    {
      warn!(error = %describe(&err), "failed to toggle dark class");
    }
  }

  fn prefers_dark(&self) -> bool {
    self
      .dark_query()
      .is_some_and(|mql| mql.matches())
  }

  fn watch_color_scheme(
    &self,
    listener: SchemeListener
  ) -> ColorSchemeWatch {
    let Some(mql) = self.dark_query()
    else {
      return ColorSchemeWatch::new(
        || {}
      );
    };

    let target = mql.clone();
    let handle = EventListener::new(
      &target,
      "change",
      move |_| listener(mql.matches())
    );
    let slot =
      Rc::new(RefCell::new(Some(handle)));
    ColorSchemeWatch::new(move || {
      slot.borrow_mut().take();
    })
  }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BrowserClock;

impl Clock for BrowserClock {
  fn now(&self) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(
      js_sys::Date::now() as i64
    )
    .unwrap_or_default()
  }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TimeoutScheduler;

impl Scheduler for TimeoutScheduler {
  fn schedule_once(
    &self,
    delay: Duration,
    task: Deferred
  ) {
    let millis = u32::try_from(
      delay.as_millis()
    )
    .unwrap_or(u32::MAX);
    Timeout::new(millis, task).forget();
  }
}

/// Zone reported by `Intl`, or UTC.
pub fn browser_timezone() -> Tz {
  let options =
    js_sys::Intl::DateTimeFormat::new(
      &js_sys::Array::new(),
      &js_sys::Object::new()
    )
    .resolved_options();
  js_sys::Reflect::get(
    &options,
    &JsValue::from_str("timeZone")
  )
  .ok()
  .and_then(|value| value.as_string())
  .and_then(|raw| {
    parse_timezone(&raw, "browser")
  })
  .unwrap_or(Tz::UTC)
}

pub fn install_tracing() {
  console_error_panic_hook::set_once();
  wasm_tracing::set_as_global_default();
}

/// Builds the stores over `localStorage`
/// and keeps them for the page's
/// lifetime.
#[wasm_bindgen(start)]
pub fn start() -> Result<(), JsValue> {
  install_tracing();

  let window = web_sys::window()
    .ok_or_else(|| {
      JsValue::from_str("no window")
    })?;
  let backend =
    WebStorageBackend::local()
      .ok_or_else(|| {
        JsValue::from_str(
          "localStorage is unavailable"
        )
      })?;

  let bus = Rc::new(StorageEventBus::new());
  let bridge = StorageEventBridge::connect(
    &window,
    bus.clone()
  );
  let storage =
    Rc::new(LocalStore::with_events(
      Rc::new(backend),
      bus
    ));

  let mut app = App::new(Host {
    storage,
    clock: Rc::new(BrowserClock),
    scheduler: Rc::new(TimeoutScheduler),
    display: Rc::new(BrowserDisplay::new(
      window
    )),
    timezone: browser_timezone()
  });
  app.start();
  info!(
    tasks = app.tasks.borrow().len(),
    "taskboard started in browser"
  );

  PAGE.with(|slot| {
    *slot.borrow_mut() = Some(Page {
      app,
      _bridge: bridge
    })
  });
  Ok(())
}

/// Detaches persistence and sync, then
/// releases the stores.
#[wasm_bindgen]
pub fn teardown() {
  let page =
    PAGE.with(|slot| slot.borrow_mut().take());
  if let Some(mut page) = page {
    page.app.teardown();
    info!("taskboard torn down");
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn quota_errors_are_recognised_by_name_or_code()
  {
    assert!(is_quota_error(
      "QuotaExceededError",
      0
    ));
    assert!(is_quota_error(
      "NS_ERROR_DOM_QUOTA_REACHED",
      1014
    ));
    assert!(is_quota_error(
      "Error", 22
    ));
    assert!(!is_quota_error(
      "SecurityError",
      18
    ));
  }
}
