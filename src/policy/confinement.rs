//! Clamping of inherited child window movement to confinement regions

use crate::geometry::{Displacement, Margins, Point, Rect};

/// First region intersecting `geometry`, or a null rectangle
pub fn confinement_rect_for(regions: &[Rect], geometry: &Rect) -> Rect {
    regions
        .iter()
        .find(|region| region.intersects(geometry))
        .copied()
        .unwrap_or_default()
}

/// Where a child window ends up when its parent moves by `movement`.
///
/// A window already partly outside its region is neither pulled back in nor
/// pushed further out. A window inside the region may not leave it. The
/// window's margins count as part of it. Without regions the movement is
/// applied as is.
pub fn confine_inherited_move(window: Rect, margins: Margins, regions: &[Rect], movement: Displacement) -> Rect {
    if regions.is_empty() {
        return window.translated(movement);
    }

    let mut geom = window.margins_added(margins);
    let confinement = confinement_rect_for(regions, &geom);

    let mut x = geom.x;
    let mut y = geom.y;

    if movement.dx > 0 {
        if geom.right() < confinement.right() {
            x = (x + movement.dx).min(confinement.right() + 1 - geom.width);
        }
    } else if geom.x > confinement.left() {
        x = (x + movement.dx).max(confinement.left());
    }

    if movement.dy > 0 {
        if geom.bottom() < confinement.bottom() {
            y = (y + movement.dy).min(confinement.bottom() + 1 - geom.height);
        }
    } else if geom.y > confinement.top() {
        y = (y + movement.dy).max(confinement.top());
    }

    geom.move_to(Point::new(x, y));
    geom.margins_removed(margins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SCREEN: Rect = Rect::new(0, 0, 1000, 800);

    #[test]
    fn test_no_regions_translates() {
        let moved = confine_inherited_move(Rect::new(10, 10, 100, 100), Margins::default(), &[], Displacement::new(5000, -20));
        assert_eq!(moved, Rect::new(5010, -10, 100, 100));
    }

    #[test]
    fn test_inside_window_stops_at_edge() {
        let window = Rect::new(850, 100, 100, 100);
        let moved = confine_inherited_move(window, Margins::default(), &[SCREEN], Displacement::new(200, 0));
        assert_eq!(moved, Rect::new(900, 100, 100, 100));
    }

    #[test]
    fn test_partly_outside_window_is_not_pushed_further() {
        let window = Rect::new(950, 100, 100, 100);
        let moved = confine_inherited_move(window, Margins::default(), &[SCREEN], Displacement::new(30, 0));
        assert_eq!(moved.x, 950);
    }

    #[test]
    fn test_partly_outside_window_may_come_back() {
        let window = Rect::new(950, 100, 100, 100);
        let moved = confine_inherited_move(window, Margins::default(), &[SCREEN], Displacement::new(-30, 0));
        assert_eq!(moved.x, 920);
    }

    #[test]
    fn test_margins_count_as_part_of_window() {
        let window = Rect::new(100, 100, 100, 100);
        let margins = Margins::new(0, 30, 0, 0);
        let moved = confine_inherited_move(window, margins, &[SCREEN], Displacement::new(0, -200));
        assert_eq!(moved.y, 30);
    }

    #[test]
    fn test_first_intersecting_region_wins() {
        let regions = [Rect::new(2000, 0, 500, 500), SCREEN];
        let window = Rect::new(100, 100, 100, 100);
        assert_eq!(confinement_rect_for(&regions, &window), SCREEN);
        assert!(confinement_rect_for(&regions, &Rect::new(5000, 5000, 10, 10)).is_null());
    }

    proptest! {
        #[test]
        fn prop_window_inside_region_stays_inside(
            x in 0i32..900, y in 0i32..700, dx in -3000i32..3000, dy in -3000i32..3000
        ) {
            let window = Rect::new(x, y, 100, 100);
            let moved = confine_inherited_move(window, Margins::default(), &[SCREEN], Displacement::new(dx, dy));
            prop_assert!(moved.left() >= SCREEN.left());
            prop_assert!(moved.top() >= SCREEN.top());
            prop_assert!(moved.right() <= SCREEN.right());
            prop_assert!(moved.bottom() <= SCREEN.bottom());
            prop_assert_eq!(moved.size(), window.size());
        }

        #[test]
        fn prop_window_past_right_edge_never_drifts_further(
            overshoot in 1i32..99, dx in 1i32..3000
        ) {
            let window = Rect::new(SCREEN.right() + 1 - 100 + overshoot, 100, 100, 100);
            let moved = confine_inherited_move(window, Margins::default(), &[SCREEN], Displacement::new(dx, 0));
            prop_assert_eq!(moved.x, window.x);
        }

        #[test]
        fn prop_leftward_move_back_is_unclamped(
            overshoot in 1i32..99, dx in 1i32..500
        ) {
            let window = Rect::new(SCREEN.right() + 1 - 100 + overshoot, 100, 100, 100);
            let moved = confine_inherited_move(window, Margins::default(), &[SCREEN], Displacement::new(-dx, 0));
            prop_assert_eq!(moved.x, window.x - dx);
        }
    }
}
