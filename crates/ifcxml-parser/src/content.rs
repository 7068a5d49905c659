// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Content models as non-deterministic automata
//!
//! Particles (element, wildcard, sequence, choice) compile to a Thompson NFA.
//! Validation keeps only the current state set per open element and steps it
//! once per child, so checking never needs the children themselves.

/// Occurrence bounds above this are treated as unbounded
pub const OCCURS_CAP: u32 = 16;

/// Index into the compiled schema's element declarations
pub type DeclId = usize;

/// Content model particle
#[derive(Clone, Debug, PartialEq)]
pub enum Particle {
    Element {
        decl: DeclId,
        min: u32,
        max: Option<u32>,
    },
    /// `xs:any` wildcard
    Any { min: u32, max: Option<u32> },
    Sequence {
        items: Vec<Particle>,
        min: u32,
        max: Option<u32>,
    },
    Choice {
        items: Vec<Particle>,
        min: u32,
        max: Option<u32>,
    },
}

impl Particle {
    fn bounds(&self) -> (u32, Option<u32>) {
        match self {
            Particle::Element { min, max, .. }
            | Particle::Any { min, max }
            | Particle::Sequence { min, max, .. }
            | Particle::Choice { min, max, .. } => (*min, *max),
        }
    }
}

/// Edge label
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Term {
    Element(DeclId),
    Any,
}

#[derive(Clone, Debug, Default)]
struct State {
    eps: Vec<usize>,
    edges: Vec<(Term, usize)>,
}

/// Compiled content model
#[derive(Clone, Debug)]
pub struct Nfa {
    states: Vec<State>,
    start: usize,
    accept: usize,
}

impl Nfa {
    /// Compile a particle
    pub fn build(particle: &Particle) -> Self {
        let mut nfa = Nfa {
            states: Vec::new(),
            start: 0,
            accept: 0,
        };
        let (start, accept) = nfa.repeat(particle);
        nfa.start = start;
        nfa.accept = accept;
        nfa
    }

    /// Automaton accepting only the empty child sequence
    pub fn empty() -> Self {
        Nfa {
            states: vec![State::default()],
            start: 0,
            accept: 0,
        }
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    fn state(&mut self) -> usize {
        self.states.push(State::default());
        self.states.len() - 1
    }

    fn eps(&mut self, from: usize, to: usize) {
        self.states[from].eps.push(to);
    }

    /// Fragment for a particle with its occurrence bounds
    fn repeat(&mut self, particle: &Particle) -> (usize, usize) {
        let (min, max) = particle.bounds();
        let min = min.min(OCCURS_CAP);
        let max = max.filter(|m| *m <= OCCURS_CAP).map(|m| m.max(min));

        let entry = self.state();
        let mut cursor = entry;
        for _ in 0..min {
            let (s, e) = self.once(particle);
            self.eps(cursor, s);
            cursor = e;
        }
        let exit = self.state();
        match max {
            None => {
                let (s, e) = self.once(particle);
                self.eps(cursor, s);
                self.eps(e, s);
                self.eps(e, exit);
                self.eps(cursor, exit);
            }
            Some(max) => {
                for _ in min..max {
                    self.eps(cursor, exit);
                    let (s, e) = self.once(particle);
                    self.eps(cursor, s);
                    cursor = e;
                }
                self.eps(cursor, exit);
            }
        }
        (entry, exit)
    }

    /// Fragment for a single occurrence
    fn once(&mut self, particle: &Particle) -> (usize, usize) {
        let start = self.state();
        let end = self.state();
        match particle {
            Particle::Element { decl, .. } => {
                self.states[start].edges.push((Term::Element(*decl), end));
            }
            Particle::Any { .. } => {
                self.states[start].edges.push((Term::Any, end));
            }
            Particle::Sequence { items, .. } => {
                let mut cursor = start;
                for item in items {
                    let (s, e) = self.repeat(item);
                    self.eps(cursor, s);
                    cursor = e;
                }
                self.eps(cursor, end);
            }
            Particle::Choice { items, .. } => {
                if items.is_empty() {
                    self.eps(start, end);
                }
                for item in items {
                    let (s, e) = self.repeat(item);
                    self.eps(start, s);
                    self.eps(e, end);
                }
            }
        }
        (start, end)
    }

    fn closure(&self, mut set: Vec<usize>) -> Vec<usize> {
        let mut seen = vec![false; self.states.len()];
        for &s in &set {
            seen[s] = true;
        }
        let mut i = 0;
        while i < set.len() {
            let s = set[i];
            for &next in &self.states[s].eps {
                if !seen[next] {
                    seen[next] = true;
                    set.push(next);
                }
            }
            i += 1;
        }
        set.sort_unstable();
        set
    }

    /// State set before any child
    pub fn start_set(&self) -> Vec<usize> {
        self.closure(vec![self.start])
    }

    /// Advance on one child
    ///
    /// `matches` decides whether an edge label accepts the child; the first
    /// accepting label in state order is returned with the new set. An empty
    /// set means the child was not expected.
    pub fn step<F>(&self, set: &[usize], mut matches: F) -> (Vec<usize>, Option<Term>)
    where
        F: FnMut(&Term) -> bool,
    {
        let mut next = Vec::new();
        let mut chosen = None;
        for &s in set {
            for (term, target) in &self.states[s].edges {
                if matches(term) {
                    chosen.get_or_insert(*term);
                    next.push(*target);
                }
            }
        }
        next.sort_unstable();
        next.dedup();
        (self.closure(next), chosen)
    }

    /// Whether the children seen so far form a complete content
    pub fn accepts(&self, set: &[usize]) -> bool {
        set.binary_search(&self.accept).is_ok()
    }

    /// Labels that could follow, in first-seen order
    pub fn expected(&self, set: &[usize]) -> Vec<Term> {
        let mut out = Vec::new();
        for &s in set {
            for (term, _) in &self.states[s].edges {
                if !out.contains(term) {
                    out.push(*term);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn el(decl: DeclId, min: u32, max: Option<u32>) -> Particle {
        Particle::Element { decl, min, max }
    }

    fn run(nfa: &Nfa, children: &[DeclId]) -> Option<bool> {
        let mut set = nfa.start_set();
        for &child in children {
            let (next, _) = nfa.step(&set, |t| *t == Term::Element(child) || *t == Term::Any);
            if next.is_empty() {
                return None;
            }
            set = next;
        }
        Some(nfa.accepts(&set))
    }

    #[test]
    fn test_sequence_order_and_bounds() {
        // (a, b?, c{2,3})
        let nfa = Nfa::build(&Particle::Sequence {
            items: vec![el(0, 1, Some(1)), el(1, 0, Some(1)), el(2, 2, Some(3))],
            min: 1,
            max: Some(1),
        });
        assert_eq!(run(&nfa, &[0, 2, 2]), Some(true));
        assert_eq!(run(&nfa, &[0, 1, 2, 2, 2]), Some(true));
        assert_eq!(run(&nfa, &[0, 2]), Some(false));
        assert_eq!(run(&nfa, &[1]), None);
        assert_eq!(run(&nfa, &[0, 2, 2, 2, 2]), None);
    }

    #[test]
    fn test_unbounded_choice() {
        let nfa = Nfa::build(&Particle::Choice {
            items: vec![el(0, 1, Some(1)), el(1, 1, Some(1))],
            min: 0,
            max: None,
        });
        assert_eq!(run(&nfa, &[]), Some(true));
        assert_eq!(run(&nfa, &[1, 0, 1, 1]), Some(true));
        assert_eq!(run(&nfa, &[2]), None);
    }

    #[test]
    fn test_large_bounds_are_capped() {
        let nfa = Nfa::build(&el(0, 0, Some(10_000)));
        let many = vec![0; 100];
        assert_eq!(run(&nfa, &many), Some(true));
        assert!(nfa.state_count() < 16);
    }

    #[test]
    fn test_expected_terms() {
        let nfa = Nfa::build(&Particle::Sequence {
            items: vec![el(0, 0, Some(1)), el(1, 1, Some(1))],
            min: 1,
            max: Some(1),
        });
        let set = nfa.start_set();
        assert_eq!(
            nfa.expected(&set),
            vec![Term::Element(0), Term::Element(1)]
        );
        assert!(!nfa.accepts(&set));
    }

    #[test]
    fn test_empty_model() {
        let nfa = Nfa::empty();
        assert_eq!(run(&nfa, &[]), Some(true));
        assert_eq!(run(&nfa, &[0]), None);
    }
}
