use crate::task::Zone;

/// Pointer drag across board zones. Purely transient.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DragState {
    pub dragging: bool,
    pub dragged_id: Option<String>,
    pub origin_zone: Option<Zone>,
    pub drop_zone: Option<Zone>,
}

/// What a finished drag asks the task store to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropOutcome {
    pub task_id: String,
    pub from_zone: Zone,
    pub to_zone: Zone,
}

impl DropOutcome {
    pub fn changes_zone(&self) -> bool {
        self.from_zone != self.to_zone
    }
}

impl DragState {
    pub fn start(&mut self, task_id: impl Into<String>, zone: Zone) {
        *self = Self {
            dragging: true,
            dragged_id: Some(task_id.into()),
            origin_zone: Some(zone),
            drop_zone: Some(zone),
        };
    }

    /// Hovering only counts while a drag is in progress.
    pub fn over(&mut self, zone: Zone) {
        if self.dragging {
            self.drop_zone = Some(zone);
        }
    }

    /// Ends the drag. `None` when nothing was being dragged.
    pub fn drop(&mut self, zone: Zone) -> Option<DropOutcome> {
        let finished = std::mem::take(self);
        if !finished.dragging {
            return None;
        }
        Some(DropOutcome {
            task_id: finished.dragged_id?,
            from_zone: finished.origin_zone?,
            to_zone: zone,
        })
    }

    pub fn end(&mut self) {
        *self = Self::default();
    }
}
