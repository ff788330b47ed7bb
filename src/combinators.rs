//! Constructors that start settled or that combine many deferreds into one.
use std::{cell::RefCell, rc::Rc};

use crate::{
    resolution::{IntoResolution, Resolution},
    Deferred, Error,
};

impl<T, E> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Wraps `value` in a deferred.
    ///
    /// A [`Deferred`] comes back as-is. A thenable is adopted by a new
    /// deferred; `Ok`/`Err` produce one that is already settled.
    pub fn resolve<R>(value: R) -> Self
    where
        R: IntoResolution<Value = T, Error = E>,
    {
        match value.into_resolution() {
            Resolution::Deferred(deferred) => deferred,
            resolution => Self::new(move |resolver| resolver.resolve_with(resolution)),
        }
    }

    pub fn fulfilled(value: T) -> Self {
        Self::new(move |resolver| resolver.resolve(value))
    }

    /// A deferred already rejected with `error`.
    pub fn reject(error: E) -> Self {
        Self::new(move |resolver| resolver.reject(error))
    }

    /// Fulfils with every input's value, in input order, once all of them
    /// have fulfilled. Rejects with the first rejection to arrive.
    ///
    /// An empty input fulfils straight away with an empty vector.
    ///
    /// ```
    /// use deferred_cell::{scheduler, Deferred, Error, Resolution};
    ///
    /// let (slow, resolver) = Deferred::<i32, Error>::pending();
    /// let all = Deferred::all(vec![Resolution::Deferred(slow), Resolution::Value(1)]);
    ///
    /// resolver.resolve(2);
    /// scheduler::run_until_idle().unwrap();
    /// assert_eq!(all.outcome(), Some(Ok(vec![2, 1])));
    /// ```
    pub fn all<I>(items: I) -> Deferred<Vec<T>, E>
    where
        I: IntoIterator,
        I::Item: IntoResolution<Value = T, Error = E>,
    {
        let items: Vec<Resolution<T, E>> = items
            .into_iter()
            .map(IntoResolution::into_resolution)
            .collect();

        Deferred::new(move |resolver| {
            if items.is_empty() {
                resolver.resolve(Vec::new());
                return;
            }

            let progress = Rc::new(RefCell::new(Progress {
                slots: (0..items.len()).map(|_| None).collect(),
                remaining: items.len(),
            }));
            for (index, item) in items.into_iter().enumerate() {
                let progress = Rc::clone(&progress);
                let resolver = resolver.clone();
                Self::resolve(item).on_settled(move |outcome| match outcome {
                    Ok(value) => {
                        if let Some(values) = progress.borrow_mut().fill(index, value) {
                            resolver.resolve(values);
                        }
                    }
                    Err(error) => resolver.reject(error),
                });
            }
        })
    }

    /// Settles like whichever input settles first. Bare values count as
    /// inputs that settle on the next turn; an empty input never settles.
    pub fn race<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::Item: IntoResolution<Value = T, Error = E>,
    {
        let items: Vec<Resolution<T, E>> = items
            .into_iter()
            .map(IntoResolution::into_resolution)
            .collect();

        Self::new(move |resolver| {
            for item in items {
                let resolver = resolver.clone();
                Self::resolve(item).on_settled(move |outcome| match outcome {
                    Ok(value) => resolver.resolve(value),
                    Err(error) => resolver.reject(error),
                });
            }
        })
    }
}

/// Values collected so far by [`Deferred::all`].
struct Progress<T> {
    slots: Vec<Option<T>>,
    remaining: usize,
}

impl<T> Progress<T> {
    /// Records the value at `index`, returning every value once the last
    /// slot is filled.
    fn fill(&mut self, index: usize, value: T) -> Option<Vec<T>> {
        if self.slots[index].replace(value).is_none() {
            self.remaining -= 1;
        }
        if self.remaining > 0 {
            return None;
        }
        std::mem::take(&mut self.slots).into_iter().collect()
    }
}
