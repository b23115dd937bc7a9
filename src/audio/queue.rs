use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};
use std::{collections::VecDeque, fmt, time::Duration};
use tracing::{debug, info};

use crate::{error::ValidationError, sources::Track};

/// Modo de repetición
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    #[default]
    Off,
    Track,
    Queue,
}

impl LoopMode {
    /// Ciclo off → track → queue → off.
    pub fn next(self) -> Self {
        match self {
            LoopMode::Off => LoopMode::Track,
            LoopMode::Track => LoopMode::Queue,
            LoopMode::Queue => LoopMode::Off,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LoopMode::Off => "off",
            LoopMode::Track => "track",
            LoopMode::Queue => "queue",
        }
    }
}

impl fmt::Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Cola de una sesión.
///
/// Sin locks internos: la sesión dueña serializa todo acceso.
#[derive(Debug, Clone)]
pub struct MusicQueue {
    items: VecDeque<Track>,
    max_size: usize,
}

impl MusicQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_size: max_size.max(1),
        }
    }

    /// Agrega un track al final y devuelve su posición (1-based).
    pub fn append(&mut self, track: Track) -> Result<usize, ValidationError> {
        if self.items.len() >= self.max_size {
            return Err(ValidationError::QueueFull { max: self.max_size });
        }

        debug!("➕ Agregado a la cola: {}", track.title());
        self.items.push_back(track);
        Ok(self.items.len())
    }

    /// Agrega varios tracks (playlist). Los que no caben se descartan.
    pub fn append_many(&mut self, tracks: Vec<Track>) -> usize {
        let available_space = self.max_size.saturating_sub(self.items.len());
        let to_add = tracks.len().min(available_space);

        self.items.extend(tracks.into_iter().take(to_add));
        info!("➕ Agregadas {} canciones a la cola", to_add);
        to_add
    }

    /// Saca la cabeza de la cola (FIFO)
    pub fn dequeue(&mut self) -> Option<Track> {
        self.items.pop_front()
    }

    /// Reinserta al final un track que ya sonó (loop de cola). No respeta
    /// `max_size`: el track ya formaba parte de la sesión.
    pub fn requeue(&mut self, track: Track) {
        self.items.push_back(track);
    }

    /// Elimina el track en `index` (0-based).
    pub fn remove_at(&mut self, index: usize) -> Result<Track, ValidationError> {
        let len = self.items.len();
        self.items
            .remove(index)
            .ok_or(ValidationError::IndexOutOfRange { index, len })
    }

    /// Limpia la cola y devuelve cuántos tracks había.
    pub fn clear(&mut self) -> usize {
        let removed = self.items.len();
        self.items.clear();
        if removed > 0 {
            info!("🗑️ Cola limpiada ({} canciones)", removed);
        }
        removed
    }

    /// Mezcla la cola (Fisher–Yates)
    pub fn shuffle(&mut self) {
        self.shuffle_with(&mut rand::thread_rng());
    }

    pub fn shuffle_with<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.items.make_contiguous().shuffle(rng);
        info!("🔀 Cola mezclada");
    }

    /// Mueve un track a una nueva posición
    pub fn move_track(&mut self, from: usize, to: usize) -> Result<(), ValidationError> {
        let len = self.items.len();
        if from >= len {
            return Err(ValidationError::IndexOutOfRange { index: from, len });
        }
        if to >= len {
            return Err(ValidationError::IndexOutOfRange { index: to, len });
        }

        if from != to {
            if let Some(track) = self.items.remove(from) {
                self.items.insert(to, track);
                debug!("📍 Track movido de posición {} a {}", from, to);
            }
        }
        Ok(())
    }

    /// Copia independiente del contenido actual.
    pub fn snapshot(&self) -> Vec<Track> {
        self.items.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn total_duration(&self) -> Duration {
        self.items.iter().filter_map(Track::duration).sum()
    }

    /// Obtiene una página específica de la cola
    pub fn page(&self, page: usize, items_per_page: usize) -> QueuePage {
        let items_per_page = items_per_page.max(1);
        let total_items = self.items.len();
        let total_pages = total_items.div_ceil(items_per_page).max(1);
        let current_page = page.clamp(1, total_pages);
        let start = (current_page - 1) * items_per_page;

        QueuePage {
            items: self
                .items
                .iter()
                .skip(start)
                .take(items_per_page)
                .cloned()
                .collect(),
            offset: start,
            current_page,
            total_pages,
            total_items,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuePage {
    pub items: Vec<Track>,
    /// Índice (0-based) del primer item de la página
    pub offset: usize,
    pub current_page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}
