use crate::Value;
use std::sync::Arc;

/// Provider produces the elements of a deferred array on demand.
/// Implementations must be cheap to probe: `element` is called once per
/// visited index and `is_last` lets iteration stop without probing past
/// the end.
pub trait Provider: std::fmt::Debug + Send + Sync {
    /// Short class name for diagnostics ("range", "file", ...).
    fn kind(&self) -> &'static str;
    fn element(&self, index: usize) -> Option<Value>;
    fn is_last(&self, index: usize) -> bool;
}

/// An array whose elements are produced lazily by a provider.
/// Any in-place mutation must materialise ("undefer") it first; iteration
/// and read access work directly against the provider.
#[derive(Debug, Clone)]
pub struct DeferredArray {
    provider: Arc<dyn Provider>,
}

impl DeferredArray {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        DeferredArray { provider }
    }

    pub fn kind(&self) -> &'static str {
        self.provider.kind()
    }

    pub fn first(&self) -> Option<Value> {
        self.provider.element(0)
    }

    pub fn next(&self, index: usize) -> Option<Value> {
        if self.provider.is_last(index) {
            None
        } else {
            self.provider.element(index + 1)
        }
    }

    pub fn is_last(&self, index: usize) -> bool {
        self.provider.is_last(index)
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.provider.element(index)
    }

    pub fn len(&self) -> usize {
        let mut n = 0;
        while self.provider.element(n).is_some() {
            if self.provider.is_last(n) {
                return n + 1;
            }
            n += 1;
        }
        n
    }

    pub fn is_empty(&self) -> bool {
        self.first().is_none()
    }

    pub fn iter(&self) -> DeferredIter<'_> {
        DeferredIter { arr: self, index: 0, done: false }
    }

    /// Produce the fully materialised element vector.
    pub fn materialize(&self) -> Vec<Value> {
        self.iter().collect()
    }
}

pub struct DeferredIter<'a> {
    arr: &'a DeferredArray,
    index: usize,
    done: bool,
}

impl<'a> Iterator for DeferredIter<'a> {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        if self.done {
            return None;
        }
        let elem = self.arr.get(self.index)?;
        if self.arr.is_last(self.index) {
            self.done = true;
        }
        self.index += 1;
        Some(elem)
    }
}

/// The provider behind the `lo ... hi` ellipsis operator: an inclusive
/// integer range, ascending or descending.
#[derive(Debug)]
pub struct RangeProvider {
    pub from: i64,
    pub to: i64,
}

impl RangeProvider {
    pub fn deferred(from: i64, to: i64) -> DeferredArray {
        DeferredArray::new(Arc::new(RangeProvider { from, to }))
    }

    fn count(&self) -> usize {
        (self.from - self.to).unsigned_abs() as usize + 1
    }
}

impl Provider for RangeProvider {
    fn kind(&self) -> &'static str {
        "range"
    }

    fn element(&self, index: usize) -> Option<Value> {
        if index >= self.count() {
            return None;
        }
        let n = if self.from <= self.to {
            self.from + index as i64
        } else {
            self.from - index as i64
        };
        Some(Value::from(n))
    }

    fn is_last(&self, index: usize) -> bool {
        index + 1 >= self.count()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_range_iteration() {
        let arr = RangeProvider::deferred(1, 4);
        let elems: Vec<i64> = arr.iter().map(|v| v.as_i64().unwrap()).collect();
        assert_eq!(elems, vec![1, 2, 3, 4]);
        assert_eq!(arr.len(), 4);
        assert!(arr.is_last(3));
    }

    #[test]
    fn test_descending_range() {
        let arr = RangeProvider::deferred(3, 1);
        let elems: Vec<i64> = arr.iter().map(|v| v.as_i64().unwrap()).collect();
        assert_eq!(elems, vec![3, 2, 1]);
    }

    #[test]
    fn test_first_next() {
        let arr = RangeProvider::deferred(5, 5);
        assert_eq!(arr.first(), Some(Value::from(5)));
        assert_eq!(arr.next(0), None);
    }
}
