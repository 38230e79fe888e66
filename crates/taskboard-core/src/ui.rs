//! Persisted UI preferences plus transient notifications, modals, tooltips
//! and drag state.

pub mod display;
pub mod drag;

use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::binding::PersistedCell;
use crate::notifications::{Notification, NotificationCenter, NotificationSink, Severity};
use crate::storage::LocalStore;
use crate::task::{Zone, labelled_enum};

pub use display::{ColorSchemeWatch, DisplayAdapter, HeadlessDisplay, SchemeListener};
pub use drag::{DragState, DropOutcome};

pub const UI_STATE_KEY: &str = "ui-state";
pub const ALL_FILTER: &str = "all";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Kanban,
    List,
    Calendar,
    Timeline,
}

labelled_enum!(ViewMode, "view mode", {
    Kanban => "kanban",
    List => "list",
    Calendar => "calendar",
    Timeline => "timeline",
});

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
    Auto,
}

labelled_enum!(Theme, "theme", {
    Dark => "dark",
    Light => "light",
    Auto => "auto",
});

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Density {
    Compact,
    #[default]
    Comfortable,
    Spacious,
}

labelled_enum!(Density, "density", {
    Compact => "compact",
    Comfortable => "comfortable",
    Spacious => "spacious",
});

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SidebarState {
    #[default]
    Expanded,
    Collapsed,
    Hidden,
}

labelled_enum!(SidebarState, "sidebar state", {
    Expanded => "expanded",
    Collapsed => "collapsed",
    Hidden => "hidden",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKey {
    Status,
    Priority,
    Assignee,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ActiveFilters {
    pub status: String,
    pub priority: String,
    pub assignee: Option<String>,
}

impl Default for ActiveFilters {
    fn default() -> Self {
        Self {
            status: ALL_FILTER.to_string(),
            priority: ALL_FILTER.to_string(),
            assignee: None,
        }
    }
}

impl ActiveFilters {
    pub fn is_active(&self) -> bool {
        self.status != ALL_FILTER || self.priority != ALL_FILTER || self.assignee.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct UiState {
    pub view_mode: ViewMode,
    pub theme: Theme,
    pub density: Density,
    pub sidebar: SidebarState,
    pub show_task_details: bool,
    pub show_filters: bool,
    pub show_quick_add: bool,
    pub show_command_palette: bool,
    pub selected_zone: Option<Zone>,
    pub dragged_task_id: Option<String>,
    pub active_filters: ActiveFilters,
}

pub struct UiStore {
    state: PersistedCell<UiState>,
    notifications: Rc<NotificationCenter>,
    modals: BTreeMap<String, bool>,
    tooltips: BTreeMap<String, bool>,
    display: Rc<dyn DisplayAdapter>,
    theme_watch: Option<ColorSchemeWatch>,
    drag: DragState,
}

impl UiStore {
    pub fn new(
        store: Rc<LocalStore>,
        notifications: Rc<NotificationCenter>,
        display: Rc<dyn DisplayAdapter>,
    ) -> Self {
        let sink: Rc<dyn NotificationSink> = notifications.clone();
        let state = PersistedCell::load(store, UI_STATE_KEY, UiState::default()).with_sink(sink);

        Self {
            state,
            notifications,
            modals: BTreeMap::new(),
            tooltips: BTreeMap::new(),
            display,
            theme_watch: None,
            drag: DragState::default(),
        }
    }

    pub fn state(&self) -> &UiState {
        self.state.get()
    }

    pub fn key(&self) -> &str {
        self.state.key()
    }

    // Derived

    pub fn is_dark_mode(&self) -> bool {
        match self.state().theme {
            Theme::Auto => self.display.prefers_dark(),
            theme => theme == Theme::Dark,
        }
    }

    pub fn is_sidebar_visible(&self) -> bool {
        self.state().sidebar != SidebarState::Hidden
    }

    pub fn is_sidebar_expanded(&self) -> bool {
        self.state().sidebar == SidebarState::Expanded
    }

    pub fn has_active_filters(&self) -> bool {
        self.state().active_filters.is_active()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.all()
    }

    pub fn active_notifications(&self) -> Vec<Notification> {
        self.notifications.active()
    }

    // Preferences

    pub fn set_view_mode(&mut self, mode: ViewMode) {
        self.state.update(|s| s.view_mode = mode);
    }

    #[tracing::instrument(skip(self))]
    pub fn set_theme(&mut self, theme: Theme) {
        self.state.update(|s| s.theme = theme);
        self.apply_theme(theme);
    }

    pub fn set_density(&mut self, density: Density) {
        self.state.update(|s| s.density = density);
    }

    /// Expanded and collapsed swap; a hidden sidebar stays hidden.
    pub fn toggle_sidebar(&mut self) {
        self.state.update(|s| {
            s.sidebar = match s.sidebar {
                SidebarState::Expanded => SidebarState::Collapsed,
                SidebarState::Collapsed => SidebarState::Expanded,
                SidebarState::Hidden => SidebarState::Hidden,
            }
        });
    }

    pub fn set_sidebar_state(&mut self, sidebar: SidebarState) {
        self.state.update(|s| s.sidebar = sidebar);
    }

    pub fn toggle_task_details(&mut self) {
        self.state.update(|s| s.show_task_details = !s.show_task_details);
    }

    pub fn set_task_details_visible(&mut self, visible: bool) {
        self.state.update(|s| s.show_task_details = visible);
    }

    pub fn toggle_filters(&mut self) {
        self.state.update(|s| s.show_filters = !s.show_filters);
    }

    pub fn set_filters_visible(&mut self, visible: bool) {
        self.state.update(|s| s.show_filters = visible);
    }

    pub fn toggle_quick_add(&mut self) {
        self.state.update(|s| s.show_quick_add = !s.show_quick_add);
    }

    pub fn set_quick_add_visible(&mut self, visible: bool) {
        self.state.update(|s| s.show_quick_add = visible);
    }

    pub fn toggle_command_palette(&mut self) {
        self.state.update(|s| s.show_command_palette = !s.show_command_palette);
    }

    pub fn set_command_palette_visible(&mut self, visible: bool) {
        self.state.update(|s| s.show_command_palette = visible);
    }

    pub fn set_selected_zone(&mut self, zone: Option<Zone>) {
        self.state.update(|s| s.selected_zone = zone);
    }

    pub fn set_dragged_task_id(&mut self, id: Option<String>) {
        self.state.update(|s| s.dragged_task_id = id);
    }

    /// `None` resets status or priority to "all" and clears the assignee.
    pub fn set_active_filter(&mut self, key: FilterKey, value: Option<String>) {
        self.state.update(|s| {
            let filters = &mut s.active_filters;
            match key {
                FilterKey::Status => {
                    filters.status = value.unwrap_or_else(|| ALL_FILTER.to_string());
                }
                FilterKey::Priority => {
                    filters.priority = value.unwrap_or_else(|| ALL_FILTER.to_string());
                }
                FilterKey::Assignee => filters.assignee = value,
            }
        });
    }

    pub fn clear_active_filters(&mut self) {
        self.state.update(|s| s.active_filters = ActiveFilters::default());
    }

    // Notifications

    pub fn add_notification(&self, message: &str, severity: Severity) -> String {
        self.notifications.push(message, severity)
    }

    pub fn remove_notification(&self, id: &str) -> bool {
        self.notifications.remove(id)
    }

    pub fn clear_notifications(&self) {
        self.notifications.clear();
    }

    // Modals and tooltips

    pub fn open_modal(&mut self, name: &str) {
        self.modals.insert(name.to_string(), true);
    }

    pub fn close_modal(&mut self, name: &str) {
        self.modals.insert(name.to_string(), false);
    }

    pub fn toggle_modal(&mut self, name: &str) {
        let open = self.is_modal_open(name);
        self.modals.insert(name.to_string(), !open);
    }

    pub fn is_modal_open(&self, name: &str) -> bool {
        self.modals.get(name).copied().unwrap_or(false)
    }

    pub fn show_tooltip(&mut self, id: &str) {
        self.tooltips.insert(id.to_string(), true);
    }

    pub fn hide_tooltip(&mut self, id: &str) {
        self.tooltips.insert(id.to_string(), false);
    }

    pub fn is_tooltip_visible(&self, id: &str) -> bool {
        self.tooltips.get(id).copied().unwrap_or(false)
    }

    // Theme

    /// Applies the persisted theme; called once the document exists.
    pub fn init_theme(&mut self) {
        self.apply_theme(self.state().theme);
    }

    pub fn is_watching_color_scheme(&self) -> bool {
        self.theme_watch.as_ref().is_some_and(ColorSchemeWatch::is_active)
    }

    fn apply_theme(&mut self, theme: Theme) {
        match theme {
            Theme::Auto => {
                self.display.apply_dark_mode(self.display.prefers_dark());
                if !self.is_watching_color_scheme() {
                    let display = Rc::downgrade(&self.display);
                    let listener: SchemeListener = Rc::new(move |dark| {
                        if let Some(display) = display.upgrade() {
                            display.apply_dark_mode(dark);
                        }
                    });
                    self.theme_watch = Some(self.display.watch_color_scheme(listener));
                    debug!("watching platform color scheme");
                }
            }
            fixed => {
                self.stop_theme_watch();
                self.display.apply_dark_mode(fixed == Theme::Dark);
            }
        }
    }

    fn stop_theme_watch(&mut self) {
        if let Some(mut watch) = self.theme_watch.take() {
            watch.cancel();
            debug!("stopped watching platform color scheme");
        }
    }

    // Drag and drop

    pub fn drag(&self) -> &DragState {
        &self.drag
    }

    pub fn start_drag(&mut self, task_id: &str, zone: Zone) {
        self.drag.start(task_id, zone);
        self.set_dragged_task_id(Some(task_id.to_string()));
    }

    pub fn drag_over(&mut self, zone: Zone) {
        self.drag.over(zone);
    }

    pub fn drop_on(&mut self, zone: Zone) -> Option<DropOutcome> {
        let outcome = self.drag.drop(zone);
        if self.state().dragged_task_id.is_some() {
            self.set_dragged_task_id(None);
        }
        outcome
    }

    pub fn end_drag(&mut self) {
        self.drag.end();
        if self.state().dragged_task_id.is_some() {
            self.set_dragged_task_id(None);
        }
    }

    // Lifecycle

    /// Installs state written by another context and re-applies its theme.
    pub fn apply_external(&mut self, state: UiState) {
        let theme = state.theme;
        let theme_changed = theme != self.state().theme;
        self.state.replace_from_external(state);
        if theme_changed {
            info!(%theme, "theme changed in another context");
            self.apply_theme(theme);
        }
    }

    pub fn reload(&mut self) -> bool {
        let loaded = self.state.reload();
        if loaded {
            self.init_theme();
        }
        loaded
    }

    pub fn teardown(&mut self) {
        self.stop_theme_watch();
        self.state.teardown();
    }
}
