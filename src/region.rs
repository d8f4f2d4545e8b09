use crate::constants::{FP_COINCIDENT, FP_PRECISION, INFTY, SURFACE_NONE};
use crate::error::{GeometryError, Result};
use crate::position::{advance, Direction, Position};
use crate::surface::Surface;
use smallvec::SmallVec;

/// A token of a region expression.
///
/// `Halfspace` holds a signed surface reference: its magnitude is the 1-based index of
/// the surface, its sign the side of the surface that belongs to the region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Token {
    Halfspace(i32),
    LeftParen,
    RightParen,
    Complement,
    Intersection,
    Union,
}

impl Token {
    #[inline]
    fn precedence(self) -> u8 {
        match self {
            Token::Complement => 3,
            Token::Intersection => 2,
            Token::Union => 1,
            _ => 0,
        }
    }

    #[inline]
    fn is_operator(self) -> bool {
        matches!(self, Token::Complement | Token::Intersection | Token::Union)
    }

    #[inline]
    fn ends_operand(self) -> bool {
        matches!(self, Token::Halfspace(_) | Token::RightParen)
    }

    #[inline]
    fn starts_operand(self) -> bool {
        matches!(self, Token::Halfspace(_) | Token::LeftParen | Token::Complement)
    }
}

#[inline]
fn surface_index(token: i32) -> usize {
    (token.unsigned_abs() - 1) as usize
}

/// Whether the half-space `token` holds at `r`, honoring the `on_surface` tie-break.
#[inline]
fn halfspace_holds(surfaces: &[Surface], token: i32, r: &Position, u: &Direction, on_surface: i32) -> bool {
    if token == on_surface {
        true
    } else if token == -on_surface {
        false
    } else {
        surfaces[surface_index(token)].sense(r, u) == (token > 0)
    }
}

/// Splits the textual form of a region (`"-1 2 | ~(3 -4)"`) into tokens.
///
/// Surface references are returned as written, i.e. as user-facing surface IDs.
/// Juxtaposed operands are left as is; [`Region::new`] inserts the implied intersections.
pub fn tokenize(cell_id: i32, expr: &str) -> Result<Vec<Token>> {
    let malformed = |reason: String| GeometryError::MalformedRegion { cell_id, reason };
    let mut tokens = Vec::new();
    let mut chars = expr.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '(' => tokens.push(Token::LeftParen),
            ')' => tokens.push(Token::RightParen),
            '~' => tokens.push(Token::Complement),
            '|' => tokens.push(Token::Union),
            '+' | '-' | '0'..='9' => {
                let negative = c == '-';
                let mut digits = String::new();
                if c.is_ascii_digit() {
                    digits.push(c);
                }
                while let Some(&(_, d)) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    digits.push(d);
                    chars.next();
                }
                if digits.is_empty() {
                    return Err(malformed(format!("expected a surface id after '{}' at position {}", c, pos)));
                }
                let id: i32 = digits
                    .parse()
                    .map_err(|_| malformed(format!("surface id '{}' out of range", digits)))?;
                if id == 0 {
                    return Err(malformed("surface id 0 has no sign".to_string()));
                }
                tokens.push(Token::Halfspace(if negative { -id } else { id }));
            }
            other => return Err(malformed(format!("unexpected character '{}' at position {}", other, pos))),
        }
    }
    Ok(tokens)
}

/// Inserts the intersection implied between two adjacent operands, e.g. `1 -2` or `1 (2 | 3)`.
fn add_implicit_intersections(infix: &[Token]) -> Vec<Token> {
    let mut out = Vec::with_capacity(infix.len() * 2);
    for &token in infix {
        if let Some(&prev) = out.last() {
            if Token::ends_operand(prev) && token.starts_operand() {
                out.push(Token::Intersection);
            }
        }
        out.push(token);
    }
    out
}

/// Checks operator arity and parenthesis balance of an expression with explicit intersections.
fn validate(tokens: &[Token]) -> std::result::Result<(), String> {
    let mut depth = 0usize;
    let mut expect_operand = true;

    for (i, &token) in tokens.iter().enumerate() {
        match token {
            Token::Halfspace(0) => return Err(format!("token {} references surface 0", i)),
            Token::Halfspace(_) => {
                if !expect_operand {
                    return Err(format!("missing operator before token {}", i));
                }
                expect_operand = false;
            }
            Token::LeftParen => {
                if !expect_operand {
                    return Err(format!("missing operator before '(' at token {}", i));
                }
                depth += 1;
            }
            Token::Complement => {
                if !expect_operand {
                    return Err(format!("'~' at token {} must precede an operand", i));
                }
            }
            Token::RightParen => {
                if expect_operand {
                    return Err(format!("')' at token {} closes an empty or incomplete group", i));
                }
                if depth == 0 {
                    return Err(format!("unbalanced ')' at token {}", i));
                }
                depth -= 1;
            }
            Token::Intersection | Token::Union => {
                if expect_operand {
                    return Err(format!("binary operator at token {} is missing its left operand", i));
                }
                expect_operand = true;
            }
        }
    }

    if depth != 0 {
        return Err(format!("{} unclosed '('", depth));
    }
    if expect_operand && !tokens.is_empty() {
        return Err("expression ends with an operator".to_string());
    }
    Ok(())
}

/// Shunting-yard translation of a validated infix expression to reverse Polish notation.
fn to_rpn(infix: &[Token]) -> std::result::Result<Vec<Token>, String> {
    let mut rpn = Vec::with_capacity(infix.len());
    let mut stack: Vec<Token> = Vec::new();

    for &token in infix {
        match token {
            Token::Halfspace(_) => rpn.push(token),
            Token::LeftParen => stack.push(token),
            Token::RightParen => loop {
                match stack.pop() {
                    Some(Token::LeftParen) => break,
                    Some(op) => rpn.push(op),
                    None => return Err("mismatched ')'".to_string()),
                }
            },
            _ => {
                // Complement is a right-associative prefix operator, the binary ones
                // are left-associative.
                let right_assoc = token == Token::Complement;
                while let Some(&top) = stack.last() {
                    if !top.is_operator() {
                        break;
                    }
                    let pops = if right_assoc {
                        token.precedence() < top.precedence()
                    } else {
                        token.precedence() <= top.precedence()
                    };
                    if !pops {
                        break;
                    }
                    rpn.push(top);
                    stack.pop();
                }
                stack.push(token);
            }
        }
    }

    while let Some(op) = stack.pop() {
        if op == Token::LeftParen {
            return Err("mismatched '('".to_string());
        }
        rpn.push(op);
    }
    Ok(rpn)
}

/// Evaluates an RPN expression with a boolean stack.
///
/// `holds` reports whether a signed half-space reference is satisfied. An empty
/// expression describes all of space.
#[inline]
fn evaluate_rpn<F>(rpn: &[Token], mut holds: F) -> bool
where
    F: FnMut(i32) -> bool,
{
    let mut stack: SmallVec<[bool; 16]> = SmallVec::new();
    for &token in rpn {
        match token {
            Token::Halfspace(h) => stack.push(holds(h)),
            Token::Complement => {
                if let Some(top) = stack.last_mut() {
                    *top = !*top;
                }
            }
            Token::Intersection | Token::Union => {
                let b = stack.pop().unwrap_or(false);
                let a = stack.pop().unwrap_or(false);
                stack.push(if token == Token::Intersection { a && b } else { a || b });
            }
            Token::LeftParen | Token::RightParen => {}
        }
    }
    debug_assert!(stack.len() <= 1, "RPN left {} values on the stack", stack.len());
    stack.pop().unwrap_or(true)
}

/// A region of space defined as a boolean combination of surface half-spaces.
///
/// The authored infix form is translated once into reverse Polish notation. Regions made
/// only of intersections are flagged as simple and evaluated by short-circuiting over a
/// flat list of half-spaces; all others go through a boolean stack machine.
#[derive(Clone, Debug)]
pub struct Region {
    infix: Vec<Token>,
    rpn: Vec<Token>,
    simple: bool,
    /// Half-spaces of a simple region in authored order.
    halfspaces: Vec<i32>,
    /// Distinct surfaces referenced by the region, 0-based.
    surfaces: Vec<usize>,
    /// RPN of a complex region with surface references replaced by slots into `surfaces`.
    local_rpn: Vec<Token>,
}

impl Region {
    /// Builds a region from infix tokens whose half-spaces reference 1-based surface indices.
    ///
    /// Fails with [`GeometryError::MalformedRegion`] if parentheses are unbalanced or an
    /// operator lacks operands. `cell_id` only serves the error message.
    pub fn new(cell_id: i32, infix: Vec<Token>) -> Result<Region> {
        let malformed = |reason: String| GeometryError::MalformedRegion { cell_id, reason };

        let expanded = add_implicit_intersections(&infix);
        validate(&expanded).map_err(malformed)?;
        let rpn = to_rpn(&expanded).map_err(malformed)?;

        let simple = !rpn.iter().any(|t| matches!(t, Token::Union | Token::Complement));

        let mut surfaces: Vec<usize> = Vec::new();
        for token in &rpn {
            if let Token::Halfspace(h) = *token {
                let s = surface_index(h);
                if !surfaces.contains(&s) {
                    surfaces.push(s);
                }
            }
        }

        let halfspaces = if simple {
            rpn.iter()
                .filter_map(|t| match *t {
                    Token::Halfspace(h) => Some(h),
                    _ => None,
                })
                .collect()
        } else {
            Vec::new()
        };

        let local_rpn = if simple {
            Vec::new()
        } else {
            rpn.iter()
                .map(|t| match *t {
                    Token::Halfspace(h) => {
                        let slot = surfaces.iter().position(|&s| s == surface_index(h)).unwrap_or(0) as i32 + 1;
                        Token::Halfspace(if h > 0 { slot } else { -slot })
                    }
                    other => other,
                })
                .collect()
        };

        Ok(Region { infix, rpn, simple, halfspaces, surfaces, local_rpn })
    }

    /// The expression as authored.
    pub fn infix(&self) -> &[Token] {
        &self.infix
    }

    pub fn rpn(&self) -> &[Token] {
        &self.rpn
    }

    /// Whether the region is a pure intersection of half-spaces.
    pub fn is_simple(&self) -> bool {
        self.simple
    }

    /// Distinct 0-based surface indices referenced by the region.
    pub fn surfaces(&self) -> &[usize] {
        &self.surfaces
    }

    /// Signed half-space references in order of appearance.
    pub fn halfspaces(&self) -> impl Iterator<Item = i32> + '_ {
        self.rpn.iter().filter_map(|t| match *t {
            Token::Halfspace(h) => Some(h),
            _ => None,
        })
    }

    /// Evaluates the region for an arbitrary assignment of half-space truth values.
    pub fn evaluate<F>(&self, holds: F) -> bool
    where
        F: FnMut(i32) -> bool,
    {
        evaluate_rpn(&self.rpn, holds)
    }

    /// Determines if the region contains `r`.
    ///
    /// `u` breaks ties for points lying on a surface. `on_surface` is the signed reference
    /// of a surface the point is known to be on (or `SURFACE_NONE`); it takes precedence
    /// over the computed sense of that surface.
    #[inline]
    pub fn contains(&self, surfaces: &[Surface], r: &Position, u: &Direction, on_surface: i32) -> bool {
        if self.simple {
            self.contains_simple(surfaces, r, u, on_surface)
        } else {
            self.contains_complex(surfaces, r, u, on_surface)
        }
    }

    /// Short-circuit evaluation; only valid for simple regions.
    #[inline]
    pub fn contains_simple(&self, surfaces: &[Surface], r: &Position, u: &Direction, on_surface: i32) -> bool {
        debug_assert!(self.simple);
        self.halfspaces
            .iter()
            .all(|&h| halfspace_holds(surfaces, h, r, u, on_surface))
    }

    /// Stack-machine evaluation of the RPN form; valid for every region.
    pub fn contains_complex(&self, surfaces: &[Surface], r: &Position, u: &Direction, on_surface: i32) -> bool {
        evaluate_rpn(&self.rpn, |h| halfspace_holds(surfaces, h, r, u, on_surface))
    }

    /// Finds the oncoming boundary of the region.
    ///
    /// Returns the distance along `u` and the signed reference of the crossed surface,
    /// signed by the side the particle ends up on. `(INFTY, SURFACE_NONE)` when the ray
    /// never leaves the region.
    pub fn distance(&self, surfaces: &[Surface], r: &Position, u: &Direction, on_surface: i32) -> (f64, i32) {
        if self.simple {
            self.distance_simple(surfaces, r, u, on_surface)
        } else {
            self.distance_complex(surfaces, r, u, on_surface)
        }
    }

    fn distance_simple(&self, surfaces: &[Surface], r: &Position, u: &Direction, on_surface: i32) -> (f64, i32) {
        let mut min_dist = INFTY;
        let mut crossed = SURFACE_NONE;

        // Every half-space of an intersection bounds it, so the nearest crossing wins.
        for &h in &self.halfspaces {
            let coincident = h.unsigned_abs() == on_surface.unsigned_abs();
            let d = surfaces[surface_index(h)].distance(r, u, coincident);
            if d <= FP_COINCIDENT {
                continue;
            }
            if d < min_dist && (min_dist - d) / min_dist >= FP_PRECISION {
                min_dist = d;
                crossed = -h;
            }
        }
        (min_dist, crossed)
    }

    fn distance_complex(&self, surfaces: &[Surface], r: &Position, u: &Direction, on_surface: i32) -> (f64, i32) {
        let mut senses: SmallVec<[bool; 16]> = self
            .surfaces
            .iter()
            .map(|&s| {
                let reference = s as i32 + 1;
                if on_surface == reference {
                    true
                } else if on_surface == -reference {
                    false
                } else {
                    surfaces[s].sense(r, u)
                }
            })
            .collect();

        let inside = evaluate_rpn(&self.local_rpn, |h| senses[surface_index(h)] == (h > 0));

        let mut crossings: SmallVec<[(f64, usize); 16]> = SmallVec::new();
        for (slot, &s) in self.surfaces.iter().enumerate() {
            let coincident = on_surface.unsigned_abs() as usize == s + 1;
            let d = surfaces[s].distance(r, u, coincident);
            if d < INFTY && d > FP_COINCIDENT {
                crossings.push((d, slot));
            }
        }

        // Walk the crossings in order, flipping one sense at a time, until the region's
        // value changes. Quadrics are crossed at most twice, which bounds the walk.
        let max_steps = 4 * self.surfaces.len();
        for _ in 0..max_steps {
            let Some((pos, &(d, slot))) = crossings
                .iter()
                .enumerate()
                .min_by(|a, b| a.1.0.partial_cmp(&b.1.0).unwrap_or(std::cmp::Ordering::Equal))
            else {
                break;
            };

            senses[slot] = !senses[slot];
            if evaluate_rpn(&self.local_rpn, |h| senses[surface_index(h)] == (h > 0)) != inside {
                let reference = self.surfaces[slot] as i32 + 1;
                return (d, if senses[slot] { reference } else { -reference });
            }

            // Not a boundary of the region; the same surface may be met again further on.
            let s = self.surfaces[slot];
            let next = surfaces[s].distance(&advance(r, u, d), u, true);
            if next < INFTY && next > FP_COINCIDENT {
                crossings[pos] = (d + next, slot);
            } else {
                crossings.swap_remove(pos);
            }
        }
        (INFTY, SURFACE_NONE)
    }

    /// Writes the region back in its textual form, mapping 0-based surface indices to IDs.
    pub fn format_with<F>(&self, id_of: F) -> String
    where
        F: Fn(usize) -> i32,
    {
        let mut out = String::new();
        let mut prev: Option<Token> = None;

        for &token in &self.infix {
            let text = match token {
                Token::Halfspace(h) => {
                    let id = id_of(surface_index(h));
                    if h > 0 { id.to_string() } else { format!("-{}", id) }
                }
                Token::LeftParen => "(".to_string(),
                Token::RightParen => ")".to_string(),
                Token::Complement => "~".to_string(),
                Token::Union => "|".to_string(),
                Token::Intersection => continue,
            };
            let glue = !out.is_empty()
                && token != Token::RightParen
                && !matches!(prev, Some(Token::LeftParen) | Some(Token::Complement));
            if glue {
                out.push(' ');
            }
            out.push_str(&text);
            prev = Some(token);
        }
        out
    }
}
