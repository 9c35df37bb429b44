//! Programmable in-memory model source.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use super::{
    Collection, ElementRecord, EntityError, EntityIter, MaterialRecord, ModelParser, ParseContext,
    ParseError, SpatialNode, SystemRecord, TypeRecord,
};
use crate::pipeline::CancelToken;

/// A model assembled in code, with optional injected failures.
#[derive(Debug, Clone, Default)]
pub struct InMemoryModel {
    spatial: Vec<Result<SpatialNode, EntityError>>,
    materials: Vec<Result<MaterialRecord, EntityError>>,
    types: Vec<Result<TypeRecord, EntityError>>,
    systems: Vec<Result<SystemRecord, EntityError>>,
    elements: Vec<Result<ElementRecord, EntityError>>,
    unreadable: HashSet<Collection>,
    element_delay: Option<Duration>,
    cancel_after_elements: Option<(usize, CancelToken)>,
}

impl InMemoryModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_spatial(mut self, node: SpatialNode) -> Self {
        self.spatial.push(Ok(node));
        self
    }

    pub fn with_material(mut self, material: MaterialRecord) -> Self {
        self.materials.push(Ok(material));
        self
    }

    pub fn with_type(mut self, type_record: TypeRecord) -> Self {
        self.types.push(Ok(type_record));
        self
    }

    pub fn with_system(mut self, system: SystemRecord) -> Self {
        self.systems.push(Ok(system));
        self
    }

    pub fn with_element(mut self, element: ElementRecord) -> Self {
        self.elements.push(Ok(element));
        self
    }

    /// Appends an element slot that fails to decode.
    pub fn with_corrupt_element(mut self, error: EntityError) -> Self {
        self.elements.push(Err(error));
        self
    }

    pub fn with_corrupt_type(mut self, error: EntityError) -> Self {
        self.types.push(Err(error));
        self
    }

    /// Makes a whole collection fail to open.
    pub fn unreadable(mut self, collection: Collection) -> Self {
        self.unreadable.insert(collection);
        self
    }

    /// Sleeps before yielding each element.
    pub fn slow_elements(mut self, delay: Duration) -> Self {
        self.element_delay = Some(delay);
        self
    }

    /// Cancels `token` as the `count`-th element is yielded.
    pub fn cancel_after_elements(mut self, count: usize, token: CancelToken) -> Self {
        self.cancel_after_elements = Some((count, token));
        self
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    fn iter<'a, T: Clone + 'a>(
        &'a self,
        collection: Collection,
        items: &'a [Result<T, EntityError>],
    ) -> Result<EntityIter<'a, T>, ParseError> {
        if self.unreadable.contains(&collection) {
            return Err(ParseError::Unreadable {
                collection,
                reason: "collection could not be read".to_string(),
            });
        }
        Ok(Box::new(items.iter().cloned()))
    }
}

impl ParseContext for InMemoryModel {
    fn spatial_hierarchy(&self) -> Result<EntityIter<'_, SpatialNode>, ParseError> {
        self.iter(Collection::Spatial, &self.spatial)
    }

    fn materials(&self) -> Result<EntityIter<'_, MaterialRecord>, ParseError> {
        self.iter(Collection::Materials, &self.materials)
    }

    fn types(&self) -> Result<EntityIter<'_, TypeRecord>, ParseError> {
        self.iter(Collection::Types, &self.types)
    }

    fn systems(&self) -> Result<EntityIter<'_, SystemRecord>, ParseError> {
        self.iter(Collection::Systems, &self.systems)
    }

    fn elements(&self) -> Result<EntityIter<'_, ElementRecord>, ParseError> {
        let mut iter = self.iter(Collection::Elements, &self.elements)?;
        if let Some(delay) = self.element_delay {
            iter = Box::new(iter.inspect(move |_| std::thread::sleep(delay)));
        }
        if let Some((count, token)) = &self.cancel_after_elements {
            let (count, token) = (*count, token.clone());
            iter = Box::new(iter.enumerate().map(move |(index, element)| {
                if index + 1 == count {
                    token.cancel();
                }
                element
            }));
        }
        Ok(iter)
    }
}

/// Parser returning clones of a fixed [`InMemoryModel`], ignoring the bytes.
#[derive(Debug)]
pub struct InMemoryParser {
    model: InMemoryModel,
    transient_failures: AtomicU32,
    malformed: bool,
    opens: AtomicU32,
}

impl InMemoryParser {
    pub fn new(model: InMemoryModel) -> Self {
        Self {
            model,
            transient_failures: AtomicU32::new(0),
            malformed: false,
            opens: AtomicU32::new(0),
        }
    }

    /// The next `times` opens fail with [`ParseError::Unavailable`].
    pub fn fail_open_transiently(self, times: u32) -> Self {
        self.transient_failures.store(times, Ordering::SeqCst);
        self
    }

    /// Every open fails with [`ParseError::Malformed`].
    pub fn reject_as_malformed(mut self) -> Self {
        self.malformed = true;
        self
    }

    pub fn open_count(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }
}

impl ModelParser for InMemoryParser {
    fn open(&self, _bytes: &[u8]) -> Result<Box<dyn ParseContext>, ParseError> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        if self.malformed {
            return Err(ParseError::Malformed("model rejected".to_string()));
        }

        let failed_transiently = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed_transiently {
            return Err(ParseError::Unavailable(
                "model store temporarily unavailable".to_string(),
            ));
        }

        Ok(Box::new(self.model.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_failures_are_consumed() {
        let parser = InMemoryParser::new(InMemoryModel::new()).fail_open_transiently(2);
        assert!(parser.open(b"").is_err());
        assert!(parser.open(b"").is_err());
        assert!(parser.open(b"").is_ok());
        assert_eq!(parser.open_count(), 3);
    }

    #[test]
    fn test_unreadable_collection() {
        let model = InMemoryModel::new().unreadable(Collection::Types);
        assert!(model.types().is_err());
        assert!(model.elements().is_ok());
    }

    #[test]
    fn test_corrupt_element_slot() {
        let model = InMemoryModel::new()
            .with_element(ElementRecord::new("E1", "Wall"))
            .with_corrupt_element(EntityError::corrupt("bad").with_id("E2"));
        let results: Vec<_> = model.elements().unwrap().collect();
        assert!(results[0].is_ok());
        assert_eq!(results[1].as_ref().unwrap_err().global_id.as_deref(), Some("E2"));
    }
}
