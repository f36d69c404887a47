//! Generic attribute storage seam.
//!
//! The engine never interprets attribute data. It asks the store to
//! default-initialize, interpolate, copy or swap elements while it edits the
//! mesh. `AttributeLayers` is a column store implementation usable on its own.
//!
//! Corner data is addressed by [`corner_index`]: `face * 3 + slot`.

use std::ops::{Add, Mul};

use glam::{Vec2, Vec3, Vec4};

use crate::mesh::FaceId;

/// Element domain an attribute column lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttrDomain {
    Vertex,
    Face,
    /// Face corner (one per face vertex)
    Corner,
}

/// Storage index of a face corner.
pub fn corner_index(face: FaceId, slot: usize) -> u32 {
    face.0 * 3 + slot as u32
}

/// Capability the topology editor needs from attribute storage.
pub trait AttributeStore {
    /// Reset `elem` to layer defaults.
    fn set_default(&mut self, domain: AttrDomain, elem: u32);

    /// Write the weighted sum of `sources` into `dst`.
    ///
    /// `dst` may appear among the sources.
    fn interpolate(&mut self, domain: AttrDomain, dst: u32, sources: &[(u32, f32)]);

    fn copy(&mut self, domain: AttrDomain, dst: u32, src: u32);

    fn swap(&mut self, domain: AttrDomain, a: u32, b: u32);

    /// Index of the named layer, if present.
    fn layer_index(&self, domain: AttrDomain, name: &str) -> Option<usize>;
}

/// Column data for one layer.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerData {
    Float(Vec<f32>),
    Float2(Vec<Vec2>),
    Float3(Vec<Vec3>),
    Float4(Vec<Vec4>),
}

/// Apply `$body` to the column vector regardless of its element type.
macro_rules! with_column {
    ($data:expr, $col:ident => $body:expr) => {
        match $data {
            LayerData::Float($col) => $body,
            LayerData::Float2($col) => $body,
            LayerData::Float3($col) => $body,
            LayerData::Float4($col) => $body,
        }
    };
}

impl LayerData {
    pub fn len(&self) -> usize {
        with_column!(self, col => col.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw column bytes, e.g. for upload by a renderer.
    pub fn as_bytes(&self) -> &[u8] {
        with_column!(self, col => bytemuck::cast_slice(col.as_slice()))
    }
}

fn weighted_sum<T>(col: &[T], sources: &[(u32, f32)]) -> T
where
    T: Copy + Default + Add<Output = T> + Mul<f32, Output = T>,
{
    sources
        .iter()
        .fold(T::default(), |acc, &(src, w)| acc + col[src as usize] * w)
}

/// A named attribute column.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeLayer {
    pub name: String,
    pub domain: AttrDomain,
    pub data: LayerData,
    /// Value written by `set_default`
    pub default: Vec4,
}

impl AttributeLayer {
    /// Value of `elem` widened to four components; the layer default past
    /// the end of the column.
    pub fn get(&self, elem: u32) -> Vec4 {
        let i = elem as usize;
        match &self.data {
            LayerData::Float(col) => col.get(i).map_or(self.default, |&x| Vec4::new(x, 0.0, 0.0, 0.0)),
            LayerData::Float2(col) => col.get(i).map_or(self.default, |v| v.extend(0.0).extend(0.0)),
            LayerData::Float3(col) => col.get(i).map_or(self.default, |v| v.extend(0.0)),
            LayerData::Float4(col) => col.get(i).copied().unwrap_or(self.default),
        }
    }

    /// Store `value`, dropping components the layer does not have.
    pub fn set(&mut self, elem: u32, value: Vec4) {
        let i = elem as usize;
        self.ensure_len(i + 1);
        match &mut self.data {
            LayerData::Float(col) => col[i] = value.x,
            LayerData::Float2(col) => col[i] = value.truncate().truncate(),
            LayerData::Float3(col) => col[i] = value.truncate(),
            LayerData::Float4(col) => col[i] = value,
        }
    }

    fn ensure_len(&mut self, len: usize) {
        let d = self.default;
        match &mut self.data {
            LayerData::Float(col) if col.len() < len => col.resize(len, d.x),
            LayerData::Float2(col) if col.len() < len => col.resize(len, d.truncate().truncate()),
            LayerData::Float3(col) if col.len() < len => col.resize(len, d.truncate()),
            LayerData::Float4(col) if col.len() < len => col.resize(len, d),
            _ => {}
        }
    }

    fn set_default(&mut self, elem: usize) {
        self.ensure_len(elem + 1);
        let d = self.default;
        match &mut self.data {
            LayerData::Float(col) => col[elem] = d.x,
            LayerData::Float2(col) => col[elem] = d.truncate().truncate(),
            LayerData::Float3(col) => col[elem] = d.truncate(),
            LayerData::Float4(col) => col[elem] = d,
        }
    }

    fn interpolate(&mut self, dst: usize, sources: &[(u32, f32)]) {
        let max = sources
            .iter()
            .map(|&(s, _)| s as usize)
            .chain(std::iter::once(dst))
            .max()
            .unwrap_or(dst);
        self.ensure_len(max + 1);
        with_column!(&mut self.data, col => {
            let value = weighted_sum(col, sources);
            col[dst] = value;
        })
    }

    fn copy(&mut self, dst: usize, src: usize) {
        self.ensure_len(dst.max(src) + 1);
        with_column!(&mut self.data, col => col[dst] = col[src])
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.ensure_len(a.max(b) + 1);
        with_column!(&mut self.data, col => col.swap(a, b))
    }
}

/// Column store keyed by domain and name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeLayers {
    layers: Vec<AttributeLayer>,
}

impl AttributeLayers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a layer and return its index.
    pub fn add_layer(
        &mut self,
        name: impl Into<String>,
        domain: AttrDomain,
        data: LayerData,
        default: Vec4,
    ) -> usize {
        self.layers.push(AttributeLayer {
            name: name.into(),
            domain,
            data,
            default,
        });
        self.layers.len() - 1
    }

    pub fn layer(&self, index: usize) -> Option<&AttributeLayer> {
        self.layers.get(index)
    }

    pub fn layer_mut(&mut self, index: usize) -> Option<&mut AttributeLayer> {
        self.layers.get_mut(index)
    }

    fn in_domain(&mut self, domain: AttrDomain) -> impl Iterator<Item = &mut AttributeLayer> {
        self.layers.iter_mut().filter(move |l| l.domain == domain)
    }
}

impl AttributeStore for AttributeLayers {
    fn set_default(&mut self, domain: AttrDomain, elem: u32) {
        for layer in self.in_domain(domain) {
            layer.set_default(elem as usize);
        }
    }

    fn interpolate(&mut self, domain: AttrDomain, dst: u32, sources: &[(u32, f32)]) {
        for layer in self.in_domain(domain) {
            layer.interpolate(dst as usize, sources);
        }
    }

    fn copy(&mut self, domain: AttrDomain, dst: u32, src: u32) {
        if dst == src {
            return;
        }
        for layer in self.in_domain(domain) {
            layer.copy(dst as usize, src as usize);
        }
    }

    fn swap(&mut self, domain: AttrDomain, a: u32, b: u32) {
        if a == b {
            return;
        }
        for layer in self.in_domain(domain) {
            layer.swap(a as usize, b as usize);
        }
    }

    fn layer_index(&self, domain: AttrDomain, name: &str) -> Option<usize> {
        self.layers
            .iter()
            .position(|l| l.domain == domain && l.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uv_layers() -> (AttributeLayers, usize) {
        let mut layers = AttributeLayers::new();
        let uv = layers.add_layer(
            "uv",
            AttrDomain::Corner,
            LayerData::Float2(vec![Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0)]),
            Vec4::ZERO,
        );
        (layers, uv)
    }

    fn uv(layers: &AttributeLayers, index: usize, elem: usize) -> Vec2 {
        match &layers.layer(index).unwrap().data {
            LayerData::Float2(col) => col[elem],
            _ => panic!("uv layer has the wrong type"),
        }
    }

    #[test]
    fn test_interpolate_midpoint() {
        let (mut layers, index) = uv_layers();
        layers.interpolate(AttrDomain::Corner, 5, &[(1, 0.5), (2, 0.5)]);
        assert_eq!(uv(&layers, index, 5), Vec2::new(0.5, 0.5));
        // Grown slots between hold the default
        assert_eq!(uv(&layers, index, 4), Vec2::ZERO);
    }

    #[test]
    fn test_interpolate_in_place() {
        let (mut layers, index) = uv_layers();
        layers.interpolate(AttrDomain::Corner, 1, &[(1, 0.5), (2, 0.5)]);
        assert_eq!(uv(&layers, index, 1), Vec2::new(0.5, 0.5));
    }

    #[test]
    fn test_copy_and_swap() {
        let (mut layers, index) = uv_layers();
        layers.copy(AttrDomain::Corner, 0, 2);
        assert_eq!(uv(&layers, index, 0), Vec2::new(0.0, 1.0));
        layers.swap(AttrDomain::Corner, 0, 1);
        assert_eq!(uv(&layers, index, 0), Vec2::new(1.0, 0.0));
        assert_eq!(uv(&layers, index, 1), Vec2::new(0.0, 1.0));
    }

    #[test]
    fn test_other_domains_untouched() {
        let (mut layers, index) = uv_layers();
        layers.set_default(AttrDomain::Vertex, 0);
        assert_eq!(uv(&layers, index, 0), Vec2::new(0.0, 0.0));
        assert_eq!(layers.layer(index).unwrap().data.len(), 3);
    }

    #[test]
    fn test_layer_index_and_bytes() {
        let (layers, index) = uv_layers();
        assert_eq!(layers.layer_index(AttrDomain::Corner, "uv"), Some(index));
        assert_eq!(layers.layer_index(AttrDomain::Vertex, "uv"), None);
        assert_eq!(layers.layer(index).unwrap().data.as_bytes().len(), 3 * 8);
    }

    #[test]
    fn test_corner_index() {
        assert_eq!(corner_index(FaceId(0), 2), 2);
        assert_eq!(corner_index(FaceId(4), 1), 13);
    }
}
