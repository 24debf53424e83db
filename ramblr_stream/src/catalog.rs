use ramblr_protocol::InstructionPayload;
use tracing::debug;

pub const PAGE_SIZE: usize = 8;

pub fn page_start_for(index: i64) -> Option<usize> {
    usize::try_from(index)
        .ok()
        .map(|i| (i / PAGE_SIZE) * PAGE_SIZE)
}

/// What one of the fixed on-screen slots should show.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SlotView {
    pub occupied: bool,
    pub active: bool,
    pub step_text: String,
    pub step_text_visible: bool,
    pub step_number: String,
}

/// Step widgets on the host UI: one toggle button, one step text and one
/// step-number label per slot. The buttons form a single-selection group.
pub trait StepWidgets: Send {
    fn set_button_enabled(&mut self, slot: usize, enabled: bool);
    fn toggle_button(&mut self, slot: usize, on: bool);
    fn set_step_text(&mut self, slot: usize, text: &str, visible: bool);
    fn set_step_number(&mut self, slot: usize, label: &str, visible: bool);

    fn highlight_slot(&mut self, active_slot: usize) {
        for slot in 0..PAGE_SIZE {
            self.toggle_button(slot, slot == active_slot);
        }
    }
}

#[derive(Debug, Default)]
pub struct InstructionCatalog {
    entries: Vec<InstructionPayload>,
    current_index: Option<i64>,
    page_start: usize,
}

impl InstructionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[InstructionPayload] {
        &self.entries
    }

    pub fn current_index(&self) -> Option<i64> {
        self.current_index
    }

    pub fn page_start(&self) -> usize {
        self.page_start
    }

    /// Full replace, sorted by index. Entries sharing an index keep their
    /// arrival order.
    pub fn set_catalog(&mut self, mut instructions: Vec<InstructionPayload>) {
        if instructions.is_empty() {
            self.entries.clear();
            self.page_start = 0;
            return;
        }

        instructions.sort_by_key(|i| i.index);
        self.entries = instructions;
        debug!(steps = self.entries.len(), "instruction catalog replaced");

        let anchor = self
            .current_index
            .or_else(|| self.entries.first().map(|first| first.index));
        if let Some(start) = anchor.and_then(page_start_for) {
            self.page_start = start;
        }
    }

    /// Resolves a server instruction to a catalog index: `raw.id` first, then
    /// exact description. Returns `None` and clears the selection when
    /// neither matches.
    pub fn select(&mut self, instruction: &InstructionPayload) -> Option<i64> {
        let found = self.resolve(instruction);
        self.current_index = found;
        if let Some(start) = found.and_then(page_start_for) {
            self.page_start = start;
        }
        found
    }

    pub fn resolve(&self, instruction: &InstructionPayload) -> Option<i64> {
        if let Some(id) = instruction.raw_id() {
            if let Some(hit) = self.entries.iter().find(|c| c.raw_id() == Some(id)) {
                return Some(hit.index);
            }
        }
        self.entries
            .iter()
            .find(|c| c.description == instruction.description)
            .map(|c| c.index)
    }

    pub fn render_page(&self) -> Vec<SlotView> {
        let active_slot = self
            .current_index
            .and_then(|i| usize::try_from(i).ok())
            .and_then(|i| i.checked_sub(self.page_start))
            .filter(|slot| *slot < PAGE_SIZE);

        (0..PAGE_SIZE)
            .map(|slot| match self.entries.get(self.page_start + slot) {
                Some(entry) => {
                    let active = active_slot == Some(slot);
                    SlotView {
                        occupied: true,
                        active,
                        step_text: entry.description.clone(),
                        step_text_visible: active,
                        step_number: (self.page_start + slot + 1).to_string(),
                    }
                }
                None => SlotView::default(),
            })
            .collect()
    }

    pub fn apply(&self, widgets: &mut dyn StepWidgets) {
        let views = self.render_page();
        for (slot, view) in views.iter().enumerate() {
            widgets.set_button_enabled(slot, view.occupied);
            widgets.toggle_button(slot, view.active);
            widgets.set_step_text(slot, &view.step_text, view.step_text_visible);
            widgets.set_step_number(slot, &view.step_number, view.occupied);
        }
        if let Some(active) = views.iter().position(|v| v.active) {
            widgets.highlight_slot(active);
        }
    }
}
