pub mod scopeguard {
    use std::ops::{Deref, DerefMut};

    /// Hands `v` to `f` when the guard is dropped, whichever way the scope
    /// exits. The value stays reachable through the guard until then.
    pub fn guard<T, F: FnOnce(T)>(v: T, f: F) -> Guard<T, F> {
        Guard {
            v: Some(v),
            f: Some(f),
        }
    }

    pub struct Guard<T, F: FnOnce(T)> {
        v: Option<T>,
        f: Option<F>,
    }

    impl<T, F: FnOnce(T)> Deref for Guard<T, F> {
        type Target = T;

        fn deref(&self) -> &T {
            match &self.v {
                Some(v) => v,
                None => unreachable!("value taken before drop"),
            }
        }
    }

    impl<T, F: FnOnce(T)> DerefMut for Guard<T, F> {
        fn deref_mut(&mut self) -> &mut T {
            match &mut self.v {
                Some(v) => v,
                None => unreachable!("value taken before drop"),
            }
        }
    }

    impl<T, F: FnOnce(T)> Drop for Guard<T, F> {
        fn drop(&mut self) {
            if let (Some(v), Some(f)) = (self.v.take(), self.f.take()) {
                f(v);
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::cell::Cell;

        #[test]
        fn runs_on_early_return() {
            let released = Cell::new(0);
            let attempt = |fail: bool| -> Result<(), ()> {
                let mut g = guard(vec![1, 2], |v| released.set(released.get() + v.len()));
                g.push(3);
                if fail {
                    return Err(());
                }
                Ok(())
            };
            assert!(attempt(true).is_err());
            assert_eq!(released.get(), 3);
            assert!(attempt(false).is_ok());
            assert_eq!(released.get(), 6);
        }
    }
}
