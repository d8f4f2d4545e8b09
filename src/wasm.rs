use crate::cell::ExternalCell;
use crate::config::{CellSpec, GeometryConfig};
use crate::geometry::{Geometry, Location};
use crate::position::{Direction, Position};
use js_sys::{Array, Function, Reflect};
use wasm_bindgen::prelude::*;

#[cfg(target_arch = "wasm32")]
use wasm_bindgen_rayon::init_thread_pool;

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
pub fn init_threads(n: usize) -> js_sys::Promise {
    init_thread_pool(n)
}

// --- External cells ---

/// A cell shape implemented by a JavaScript object with `contains(x, y, z, u, v, w, onSurface)`
/// and `distance(x, y, z, u, v, w, onSurface)` methods, the latter returning
/// `[distance, surface]`.
struct JsExternalCell {
    val: JsValue,
    name: String,
}

// JS objects may only be called from the thread owning them; geometries holding
// JS cells must be queried from that thread.
unsafe impl Send for JsExternalCell {}
unsafe impl Sync for JsExternalCell {}

impl std::fmt::Debug for JsExternalCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JsExternalCell({})", self.name)
    }
}

impl JsExternalCell {
    fn call(&self, method: &str, r: &Position, u: &Direction, on_surface: i32) -> Option<JsValue> {
        let func = Reflect::get(&self.val, &method.into()).ok()?.dyn_into::<Function>().ok()?;
        let args = Array::new();
        for x in r.iter().chain(u.iter()) {
            args.push(&(*x).into());
        }
        args.push(&on_surface.into());
        func.apply(&self.val, &args).ok()
    }
}

impl ExternalCell for JsExternalCell {
    fn contains(&self, r: &Position, u: &Direction, on_surface: i32) -> bool {
        self.call("contains", r, u, on_surface)
            .and_then(|res| res.as_bool())
            .unwrap_or(false)
    }

    fn distance(&self, r: &Position, u: &Direction, on_surface: i32) -> (f64, i32) {
        let parse = |res: JsValue| -> Option<(f64, i32)> {
            let arr = res.dyn_into::<Array>().ok()?;
            Some((arr.get(0).as_f64()?, arr.get(1).as_f64()? as i32))
        };
        self.call("distance", r, u, on_surface)
            .and_then(parse)
            .unwrap_or((crate::constants::INFTY, crate::constants::SURFACE_NONE))
    }

    fn backend(&self) -> &str {
        &self.name
    }
}

// --- Builder ---

#[wasm_bindgen(js_name = GeometryBuilder)]
pub struct GeometryBuilderWASM {
    config: GeometryConfig,
    external: Vec<(CellSpec, JsValue)>,
}

#[wasm_bindgen(js_class = GeometryBuilder)]
impl GeometryBuilderWASM {
    /// Starts from a JSON geometry configuration.
    #[wasm_bindgen(constructor)]
    pub fn new(json: &str) -> Result<GeometryBuilderWASM, JsError> {
        Ok(GeometryBuilderWASM { config: GeometryConfig::from_json(json)?, external: Vec::new() })
    }

    /// Adds a cell, given as JSON, whose shape is answered by a JS object.
    pub fn add_external_cell(&mut self, cell_json: &str, backend: JsValue) -> Result<(), JsError> {
        let spec: CellSpec = serde_json::from_str(cell_json)?;
        self.external.push((spec, backend));
        Ok(())
    }

    pub fn build(self) -> Result<GeometryWASM, JsError> {
        let mut builder = self.config.into_builder();
        for (spec, val) in self.external {
            let name = format!("js:{}", spec.id);
            builder = builder.external_cell(spec, Box::new(JsExternalCell { val, name }));
        }
        Ok(GeometryWASM { inner: builder.build()?, last: None })
    }
}

// --- Geometry ---

/// Tracking front end. Surfaces and cells are addressed by their IDs; surface references
/// are signed surface IDs.
#[wasm_bindgen(js_name = Geometry)]
pub struct GeometryWASM {
    inner: Geometry,
    last: Option<Location>,
}

#[wasm_bindgen(js_class = Geometry)]
impl GeometryWASM {
    #[wasm_bindgen(constructor)]
    pub fn new(json: &str) -> Result<GeometryWASM, JsError> {
        Ok(GeometryWASM { inner: GeometryConfig::from_json(json)?.build()?, last: None })
    }

    #[wasm_bindgen(getter)]
    pub fn count_cells(&self) -> usize {
        self.inner.cells().len()
    }

    #[wasm_bindgen(getter)]
    pub fn count_surfaces(&self) -> usize {
        self.inner.surfaces().len()
    }

    /// Locates a point and returns `[cell id, instance]`. The location is kept for
    /// `next_boundary` and to speed up the following search.
    #[allow(clippy::too_many_arguments)]
    pub fn find_cell(&mut self, x: f64, y: f64, z: f64, u: f64, v: f64, w: f64, on_surface: i32) -> Result<Vec<i32>, JsError> {
        let on_surface = self.reference(on_surface)?;
        let location = self.inner.find_cell(&[x, y, z], &[u, v, w], on_surface, self.last.as_ref())?;
        let result = vec![self.inner.cell(location.cell).id(), location.instance as i32];
        self.last = Some(location);
        Ok(result)
    }

    /// Distance to the boundary of a cell of the root universe frame, as `[distance, surface]`.
    #[allow(clippy::too_many_arguments)]
    pub fn distance(
        &self,
        cell_id: i32,
        x: f64,
        y: f64,
        z: f64,
        u: f64,
        v: f64,
        w: f64,
        on_surface: i32,
    ) -> Result<Vec<f64>, JsError> {
        let cell = self.cell(cell_id)?;
        let on_surface = self.reference(on_surface)?;
        let (d, surface) = self.inner.distance_to_boundary(cell, &[x, y, z], &[u, v, w], on_surface);
        Ok(vec![d, self.surface_id(surface) as f64])
    }

    /// Nearest boundary from the last located point, as `[distance, surface, level]`.
    pub fn next_boundary(&self, on_surface: i32) -> Result<Vec<f64>, JsError> {
        let location = self.last.as_ref().ok_or_else(|| JsError::new("no point has been located yet"))?;
        let boundary = self.inner.next_boundary(location, self.reference(on_surface)?)?;
        Ok(vec![boundary.distance, self.surface_id(boundary.surface) as f64, boundary.level as f64])
    }

    pub fn temperature(&self, cell_id: i32, instance: Option<usize>) -> Result<f64, JsError> {
        Ok(self.inner.temperature(self.cell(cell_id)?, instance)?)
    }

    pub fn set_temperature(&mut self, cell_id: i32, temperature: f64, instance: Option<usize>) -> Result<(), JsError> {
        let cell = self.cell(cell_id)?;
        Ok(self.inner.set_temperature(cell, temperature, instance)?)
    }

    /// Snapshot of cells, universes and lattices as JSON.
    pub fn records(&self) -> Result<String, JsError> {
        Ok(serde_json::to_string(&self.inner.record())?)
    }
}

impl GeometryWASM {
    fn cell(&self, id: i32) -> Result<usize, JsError> {
        self.inner.cell_index(id).ok_or_else(|| JsError::new(&format!("unknown cell {}", id)))
    }

    /// Signed surface ID to signed surface reference.
    fn reference(&self, surface_id: i32) -> Result<i32, JsError> {
        if surface_id == 0 {
            return Ok(0);
        }
        let index = self
            .inner
            .surface_index(surface_id.abs())
            .ok_or_else(|| JsError::new(&format!("unknown surface {}", surface_id.abs())))?;
        Ok((index as i32 + 1) * surface_id.signum())
    }

    fn surface_id(&self, reference: i32) -> i32 {
        if reference == 0 {
            return 0;
        }
        // External cells may report surfaces of their own, passed through unchanged.
        match self.inner.surfaces().get((reference.unsigned_abs() - 1) as usize) {
            Some(surface) => surface.id() * reference.signum(),
            None => reference,
        }
    }
}
