// ============================================================================
// prop-cells - Sequence Properties
// Vec-valued derived properties with element-level change patches
// ============================================================================

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::primitives::derived::transform;
use crate::primitives::property::{PropertyInner, ReadOnlyProperty, ReadableProperty};
use crate::primitives::registration::Registration;

// =============================================================================
// SEQ PATCH
// =============================================================================

/// Element-level difference between two consecutive values of a sequence:
/// `removed` was replaced by `added`, starting at `index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeqPatch<B> {
    pub index: usize,
    pub removed: Vec<B>,
    pub added: Vec<B>,
}

impl<B: Clone + PartialEq> SeqPatch<B> {
    /// Smallest single splice turning `old` into `new` (common prefix and
    /// suffix are left out). `None` when the sequences are equal.
    pub fn diff(old: &[B], new: &[B]) -> Option<Self> {
        let prefix = old.iter().zip(new).take_while(|(a, b)| a == b).count();
        if prefix == old.len() && prefix == new.len() {
            return None;
        }

        let max_suffix = old.len().min(new.len()) - prefix;
        let suffix = old
            .iter()
            .rev()
            .zip(new.iter().rev())
            .take(max_suffix)
            .take_while(|(a, b)| a == b)
            .count();

        Some(Self {
            index: prefix,
            removed: old[prefix..old.len() - suffix].to_vec(),
            added: new[prefix..new.len() - suffix].to_vec(),
        })
    }

    /// Apply this patch to `seq` in place.
    pub fn apply(&self, seq: &mut Vec<B>) {
        let end = self.index + self.removed.len();
        seq.splice(self.index..end, self.added.iter().cloned());
    }
}

// =============================================================================
// READ-ONLY SEQ PROPERTY
// =============================================================================

/// A derived `Vec<B>` property that can also report element-level patches.
pub struct ReadOnlySeqProperty<B> {
    property: ReadOnlyProperty<Vec<B>>,
}

impl<B> Clone for ReadOnlySeqProperty<B> {
    fn clone(&self) -> Self {
        Self {
            property: self.property.clone(),
        }
    }
}

impl<B: Clone + PartialEq + 'static> ReadOnlySeqProperty<B> {
    pub fn len(&self) -> usize {
        self.with(Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.with(Vec::is_empty)
    }

    /// A clone of the element at `index`, if present.
    pub fn element(&self, index: usize) -> Option<B> {
        self.with(|elements| elements.get(index).cloned())
    }

    /// Subscribe to structural changes. Each flush whose value differs from
    /// the previously delivered one produces one patch; flushes that leave
    /// the sequence unchanged are skipped.
    ///
    /// # Example
    ///
    /// ```
    /// use std::cell::RefCell;
    /// use std::rc::Rc;
    /// use prop_cells::{Property, ReadableProperty, SeqPatch};
    ///
    /// let text = Property::new(String::from("a b c"));
    /// let words = text.transform_to_seq(|t| t.split(' ').map(String::from).collect());
    ///
    /// let patches = Rc::new(RefCell::new(Vec::new()));
    /// let sink = patches.clone();
    /// let _registration = words.listen_patches(move |patch| sink.borrow_mut().push(patch.clone()));
    ///
    /// text.set(String::from("a x c"));
    ///
    /// assert_eq!(
    ///     *patches.borrow(),
    ///     vec![SeqPatch { index: 1, removed: vec!["b".into()], added: vec!["x".into()] }]
    /// );
    /// ```
    pub fn listen_patches(&self, callback: impl Fn(&SeqPatch<B>) + 'static) -> Registration {
        let previous = RefCell::new(self.get());
        self.listen(
            move |current: &Vec<B>| {
                let patch = SeqPatch::diff(&previous.borrow(), current);
                if let Some(patch) = patch {
                    *previous.borrow_mut() = current.clone();
                    callback(&patch);
                }
            },
            false,
        )
    }
}

impl<B: Clone + 'static> ReadableProperty<Vec<B>> for ReadOnlySeqProperty<B> {
    fn inner(&self) -> &Rc<PropertyInner<Vec<B>>> {
        self.property.inner()
    }
}

impl<B: fmt::Debug + Clone + 'static> fmt::Debug for ReadOnlySeqProperty<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReadOnlySeqProperty").field(&self.property).finish()
    }
}

/// Build a sequence-valued derived property.
pub(crate) fn transform_to_seq<A, B>(
    source: &Rc<PropertyInner<A>>,
    f: impl Fn(&A) -> Vec<B> + 'static,
) -> ReadOnlySeqProperty<B>
where
    A: Clone + 'static,
    B: Clone + PartialEq + 'static,
{
    ReadOnlySeqProperty {
        property: transform(source, f),
    }
}

// =============================================================================
// TESTS
// =============================================================================
