use super::color::ColorKey;
use std::collections::HashMap;
use std::sync::Arc;

/// The parts of a real material the culler looks at
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialInfo {
    pub transparent: bool,
    pub opacity: f32,
}

impl MaterialInfo {
    pub const OPAQUE: MaterialInfo = MaterialInfo {
        transparent: false,
        opacity: 1.0,
    };

    pub fn transparent(opacity: f32) -> Self {
        Self {
            transparent: true,
            opacity,
        }
    }

    /// Objects drawn with such a material never occlude anything
    pub fn is_transparent(&self) -> bool {
        self.transparent && self.opacity < 1.0
    }
}

impl Default for MaterialInfo {
    fn default() -> Self {
        Self::OPAQUE
    }
}

/// Unlit, double-sided flat color used in the proxy scene
#[derive(Debug, Clone, PartialEq)]
pub struct FlatMaterial {
    /// `None` for the invisible placeholder
    pub color: Option<ColorKey>,
}

impl FlatMaterial {
    pub fn flat(color: ColorKey) -> Self {
        Self { color: Some(color) }
    }

    /// Fully transparent stand-in for transparent slots of multi-material objects
    pub fn placeholder() -> Self {
        Self { color: None }
    }

    pub fn is_placeholder(&self) -> bool {
        self.color.is_none()
    }

    pub fn rgba(&self) -> [f32; 4] {
        match self.color {
            Some(color) => color.to_rgba_f32(),
            None => [0.0; 4],
        }
    }
}

/// One shared flat material per identity color
#[derive(Debug, Default)]
pub struct MaterialCache {
    materials: HashMap<ColorKey, Arc<FlatMaterial>>,
}

impl MaterialCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&mut self, color: ColorKey) -> Arc<FlatMaterial> {
        Arc::clone(
            self.materials
                .entry(color)
                .or_insert_with(|| Arc::new(FlatMaterial::flat(color))),
        )
    }

    pub fn get(&self, color: ColorKey) -> Option<&Arc<FlatMaterial>> {
        self.materials.get(&color)
    }

    pub fn remove(&mut self, color: ColorKey) -> bool {
        self.materials.remove(&color).is_some()
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    pub fn clear(&mut self) {
        self.materials.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transparency_rule() {
        assert!(MaterialInfo::transparent(0.0).is_transparent());
        assert!(MaterialInfo::transparent(0.99).is_transparent());
        // Flagged transparent but fully opaque still occludes
        assert!(!MaterialInfo::transparent(1.0).is_transparent());
        assert!(!MaterialInfo { transparent: false, opacity: 0.2 }.is_transparent());
    }

    #[test]
    fn test_cache_shares_materials_per_color() {
        let mut cache = MaterialCache::new();
        let color = ColorKey::from_rgb(0, 0, 5);
        let a = cache.get_or_create(color);
        let b = cache.get_or_create(color);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
        assert!(cache.remove(color));
        assert!(cache.is_empty());
    }
}
